use std::fmt;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Calendar dates are stored and compared as `YYYY-MM-DD`, never as date-times.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HabitId(String);

impl HabitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HabitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Today's calendar date in the local time zone.
pub fn today_local() -> NaiveDate {
    normalize_date(&Local::now())
}

/// Drops the time-of-day component of a timestamp, keeping the date as seen in `Tz`.
pub fn normalize_date<Tz: TimeZone>(moment: &DateTime<Tz>) -> NaiveDate {
    moment.date_naive()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Days on which a habit was marked done.
///
/// Behaves as a set (a date appears at most once) while remembering insertion
/// order so lists render the same way on every refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedDates {
    dates: Vec<NaiveDate>,
}

impl CompletedDates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the date was already present.
    pub fn insert(&mut self, date: NaiveDate) -> bool {
        if self.contains(date) {
            return false;
        }
        self.dates.push(date);
        true
    }

    pub fn remove(&mut self, date: NaiveDate) -> bool {
        let before = self.dates.len();
        self.dates.retain(|existing| *existing != date);
        self.dates.len() != before
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    /// The set with `date` added when absent or removed when present.
    pub fn toggled(&self, date: NaiveDate) -> Self {
        let mut next = self.clone();
        if !next.remove(date) {
            next.dates.push(date);
        }
        next
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.dates.iter().copied().map(format_date).collect()
    }
}

impl FromIterator<NaiveDate> for CompletedDates {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        let mut dates = CompletedDates::new();
        for date in iter {
            dates.insert(date);
        }
        dates
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Habit {
    pub id: HabitId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub completed_dates: CompletedDates,
}

impl Habit {
    pub fn is_completed_on(&self, date: NaiveDate) -> bool {
        self.completed_dates.contains(date)
    }
}

/// A habit as submitted by the user, before the store assigns an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewHabit {
    pub name: String,
    pub completed_dates: CompletedDates,
}

impl NewHabit {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            completed_dates: CompletedDates::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn insert_ignores_duplicate_dates() {
        let mut dates = CompletedDates::new();
        assert!(dates.insert(day(2024, 6, 10)));
        assert!(!dates.insert(day(2024, 6, 10)));
        assert_eq!(dates.len(), 1);
    }

    #[test]
    fn toggling_twice_restores_original_set() {
        let original: CompletedDates = [day(2024, 6, 8), day(2024, 6, 9)].into_iter().collect();
        let today = day(2024, 6, 10);

        let once = original.toggled(today);
        assert!(once.contains(today));
        assert_eq!(once.toggled(today), original);

        let removed = original.toggled(day(2024, 6, 9));
        assert!(!removed.contains(day(2024, 6, 9)));
        assert_eq!(removed.toggled(day(2024, 6, 9)).len(), original.len());
    }

    #[test]
    fn keeps_insertion_order_for_display() {
        let dates: CompletedDates = [day(2024, 6, 10), day(2024, 6, 1), day(2024, 6, 5)]
            .into_iter()
            .collect();
        assert_eq!(
            dates.to_strings(),
            vec!["2024-06-10", "2024-06-01", "2024-06-05"]
        );
    }

    #[test]
    fn normalizes_timestamps_in_their_own_zone() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        let late_evening = offset.with_ymd_and_hms(2024, 6, 10, 23, 30, 0).unwrap();
        assert_eq!(normalize_date(&late_evening), day(2024, 6, 10));
        assert_eq!(normalize_date(&late_evening.with_timezone(&Utc)), day(2024, 6, 11));
    }

    #[test]
    fn today_is_the_local_calendar_date() {
        let before = normalize_date(&Local::now());
        let today = today_local();
        let after = normalize_date(&Local::now());
        assert!(today == before || today == after);
    }

    #[test]
    fn parses_only_plain_calendar_dates() {
        assert_eq!(parse_date("2024-06-10"), Some(day(2024, 6, 10)));
        assert_eq!(parse_date(" 2024-06-10 "), Some(day(2024, 6, 10)));
        assert_eq!(parse_date("2024-06-10T08:00:00Z"), None);
        assert_eq!(parse_date("yesterday"), None);
    }
}
