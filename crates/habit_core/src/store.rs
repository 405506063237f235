//! Contract for the remote per-user document store the habit list lives in.
//!
//! Stores push full snapshots of a user's collection to registered sinks
//! whenever anything in it changes; the returned [`Subscription`] stops those
//! pushes.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::habit::{HabitId, UserId};

/// A habit record in the store's wire shape. Dates are `YYYY-MM-DD` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitDocument {
    pub name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_dates: Vec<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_dates: Option<Vec<String>>,
}

impl HabitPatch {
    pub fn completed_dates(dates: Vec<String>) -> Self {
        Self {
            completed_dates: Some(dates),
            ..Self::default()
        }
    }

    pub fn apply(&self, document: &mut HabitDocument) {
        if let Some(name) = &self.name {
            document.name = name.clone();
        }
        if let Some(dates) = &self.completed_dates {
            document.completed_dates = dates.clone();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHabit {
    pub id: HabitId,
    pub document: HabitDocument,
}

/// Sorts a snapshot by creation time, newest first.
pub fn sort_newest_first(habits: &mut [StoredHabit]) {
    habits.sort_by_key(|habit| Reverse(habit.document.created_at));
}

/// Filter for a live subscription. Matches are delivered newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitQuery {
    pub owner: UserId,
}

impl HabitQuery {
    pub fn owned_by(owner: UserId) -> Self {
        Self { owner }
    }

    pub fn matches(&self, document: &HabitDocument) -> bool {
        document.user_id == self.owner.as_str()
    }
}

pub type SnapshotSink = Arc<dyn Fn(Vec<StoredHabit>) + Send + Sync>;

/// Handle for a live subscription. Cancelling, or dropping the handle, stops
/// all further snapshot deliveries.
#[must_use = "dropping a subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing behind it.
    pub fn inert() -> Self {
        Self { cancel: None }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Every operation is keyed by the owning user; stores refuse to touch
/// documents belonging to anyone else.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Registers `sink` for snapshots matching `query`. The current snapshot is
    /// delivered once registration succeeds.
    async fn subscribe(
        &self,
        query: HabitQuery,
        sink: SnapshotSink,
    ) -> Result<Subscription, StoreError>;

    async fn create(&self, owner: &UserId, document: HabitDocument)
        -> Result<HabitId, StoreError>;

    async fn update(
        &self,
        owner: &UserId,
        id: &HabitId,
        patch: HabitPatch,
    ) -> Result<(), StoreError>;

    async fn delete(&self, owner: &UserId, id: &HabitId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stored(id: &str, hour: u32) -> StoredHabit {
        StoredHabit {
            id: HabitId::new(id),
            document: HabitDocument {
                name: id.to_string(),
                user_id: "u1".into(),
                created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
                completed_dates: Vec::new(),
            },
        }
    }

    #[test]
    fn snapshots_sort_newest_first() {
        let mut habits = vec![stored("a", 1), stored("c", 3), stored("b", 2)];
        sort_newest_first(&mut habits);
        let ids: Vec<&str> = habits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut doc = stored("a", 1).document;
        HabitPatch::completed_dates(vec!["2024-06-10".into()]).apply(&mut doc);
        assert_eq!(doc.name, "a");
        assert_eq!(doc.completed_dates, vec!["2024-06-10"]);
    }

    #[test]
    fn document_uses_camel_case_wire_names() {
        let json = serde_json::to_value(&stored("a", 1).document).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("completedDates").is_some());
    }

    #[test]
    fn subscription_cancels_once_whether_cancelled_or_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let handle = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = calls.clone();
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(!Subscription::inert().is_active());
    }
}
