use std::collections::HashSet;

use chrono::{Days, NaiveDate};

use crate::habit::CompletedDates;

/// Consecutive completed days ending at `today`.
///
/// Zero when `today` itself is missing, even if every earlier day was done.
pub fn compute_streak(completed: &CompletedDates, today: NaiveDate) -> usize {
    let done: HashSet<NaiveDate> = completed.iter().collect();
    let mut streak = 0;
    let mut day = today;
    while done.contains(&day) {
        streak += 1;
        day = match day.pred_opt() {
            Some(previous) => previous,
            None => break,
        };
    }
    streak
}

/// One cell per day for the last `days` days, oldest first: `X` done, `.` missed.
///
/// Days before the earliest representable date render as missed.
pub fn history_graph(completed: &CompletedDates, days: usize, today: NaiveDate) -> String {
    let done: HashSet<NaiveDate> = completed.iter().collect();
    let mut graph = String::with_capacity(days);
    for offset in (0..days).rev() {
        let done_on_day = today
            .checked_sub_days(Days::new(offset as u64))
            .is_some_and(|day| done.contains(&day));
        graph.push(if done_on_day { 'X' } else { '.' });
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dates(days: &[NaiveDate]) -> CompletedDates {
        days.iter().copied().collect()
    }

    #[test]
    fn counts_today_and_yesterday() {
        let today = day(2024, 6, 10);
        let completed = dates(&[day(2024, 6, 9), today]);
        assert_eq!(compute_streak(&completed, today), 2);
    }

    #[test]
    fn gap_before_today_breaks_streak() {
        let completed = dates(&[day(2024, 6, 8)]);
        assert_eq!(compute_streak(&completed, day(2024, 6, 10)), 0);
    }

    #[test]
    fn missing_today_is_zero_even_with_long_history() {
        let today = day(2024, 6, 10);
        let completed: CompletedDates = (1..=30)
            .map(|offset| today - Duration::days(offset))
            .collect();
        assert_eq!(compute_streak(&completed, today), 0);
    }

    #[test]
    fn stops_at_first_gap_and_ignores_future_dates() {
        let today = day(2024, 6, 10);
        let completed = dates(&[
            day(2024, 6, 11),
            today,
            day(2024, 6, 9),
            day(2024, 6, 8),
            day(2024, 6, 6),
            day(2024, 6, 5),
        ]);
        assert_eq!(compute_streak(&completed, today), 3);
    }

    #[test]
    fn crosses_month_and_year_boundaries() {
        let today = day(2024, 1, 1);
        let completed = dates(&[day(2023, 12, 30), day(2023, 12, 31), today]);
        assert_eq!(compute_streak(&completed, today), 3);

        let march = day(2024, 3, 1);
        let completed = dates(&[day(2024, 2, 28), day(2024, 2, 29), march]);
        assert_eq!(compute_streak(&completed, march), 3);
    }

    #[test]
    fn matches_reference_definition_for_every_prefix() {
        let today = day(2024, 6, 10);
        let pattern = [true, true, false, true, true, true, false, true];
        let completed: CompletedDates = pattern
            .iter()
            .enumerate()
            .filter(|(_, done)| **done)
            .map(|(offset, _)| today - Duration::days(offset as i64))
            .collect();
        let expected = pattern.iter().take_while(|done| **done).count();
        assert_eq!(compute_streak(&completed, today), expected);
    }

    #[test]
    fn history_graph_marks_done_days_oldest_first() {
        let today = day(2024, 6, 10);
        let completed = dates(&[today, day(2024, 6, 8)]);
        assert_eq!(history_graph(&completed, 4, today), ".X.X");
        assert_eq!(history_graph(&completed, 0, today), "");
    }

    #[test]
    fn history_graph_treats_days_before_the_calendar_as_missed() {
        let earliest = NaiveDate::MIN;
        let today = earliest.succ_opt().unwrap();
        let completed = dates(&[earliest, today]);
        assert_eq!(history_graph(&completed, 4, today), "..XX");
    }
}
