use chrono::NaiveDate;

use crate::habit::Habit;
use crate::streak::compute_streak;

const PREAMBLE: &str = "Here's my current habits status:";

/// Renders the habit list as the plain-text status block handed to the coach.
///
/// Output depends only on `habits` and `today`, so identical input always
/// yields identical text.
pub fn format_context(habits: &[Habit], today: NaiveDate) -> String {
    let paragraphs: Vec<String> = habits
        .iter()
        .map(|habit| {
            let streak = compute_streak(&habit.completed_dates, today);
            let done_today = if habit.is_completed_on(today) {
                "Yes"
            } else {
                "No"
            };
            format!(
                "Habit: {}\nCurrent streak: {} days\nCompleted today: {}",
                habit.name, streak, done_today
            )
        })
        .collect();

    format!("{}\n\n{}", PREAMBLE, paragraphs.join("\n\n"))
}
