use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::error::{HabitError, Result};
use crate::habit::{parse_date, CompletedDates, Habit, HabitId, NewHabit, UserId};
use crate::store::{
    DocumentStore, HabitDocument, HabitPatch, HabitQuery, SnapshotSink, StoredHabit, Subscription,
};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Keeps a user's habit list in sync with the document store and forwards
/// mutations to it.
///
/// Mutations never touch local state: callers see their effect only when the
/// store pushes the next snapshot through [`HabitStore::subscribe`].
pub struct HabitStore {
    store: Arc<dyn DocumentStore>,
    clock: Clock,
}

pub struct HabitStoreBuilder {
    store: Arc<dyn DocumentStore>,
    clock: Option<Clock>,
}

impl HabitStoreBuilder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store, clock: None }
    }

    /// Source of `createdAt` for new habits. Defaults to the system clock.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> HabitStore {
        HabitStore {
            store: self.store,
            clock: self.clock.unwrap_or_else(|| Arc::new(Utc::now) as Clock),
        }
    }
}

impl HabitStore {
    pub fn builder(store: Arc<dyn DocumentStore>) -> HabitStoreBuilder {
        HabitStoreBuilder::new(store)
    }

    /// Streams the full habit list of `user`, newest first, into `on_update`
    /// after every change including the initial load.
    ///
    /// With no signed-in user nothing is subscribed and an inert handle is
    /// returned. Once the handle is cancelled or dropped `on_update` is never
    /// called again.
    #[instrument(skip(self, on_update))]
    pub async fn subscribe<F>(&self, user: Option<&UserId>, on_update: F) -> Result<Subscription>
    where
        F: Fn(Vec<Habit>) + Send + Sync + 'static,
    {
        let Some(user) = user else {
            tracing::debug!("no signed-in user; habit subscription skipped");
            return Ok(Subscription::inert());
        };

        let active = Arc::new(AtomicBool::new(true));
        let gate = active.clone();
        let owner = user.clone();
        let sink: SnapshotSink = Arc::new(move |snapshot: Vec<StoredHabit>| {
            if !gate.load(Ordering::Acquire) {
                return;
            }
            let habits = normalize_snapshot(&owner, snapshot);
            tracing::debug!(owner = %owner, habits = habits.len(), "habit snapshot delivered");
            on_update(habits);
        });

        let inner = self
            .store
            .subscribe(HabitQuery::owned_by(user.clone()), sink)
            .await
            .inspect_err(|err| tracing::warn!(%err, "habit subscription failed"))?;

        Ok(Subscription::new(move || {
            active.store(false, Ordering::Release);
            inner.cancel();
        }))
    }

    #[instrument(skip(self, habit), fields(name = %habit.name))]
    pub async fn add_habit(&self, owner: &UserId, habit: NewHabit) -> Result<()> {
        let name = habit.name.trim();
        if name.is_empty() {
            return Err(HabitError::validation("habit name must not be empty"));
        }

        let document = HabitDocument {
            name: name.to_string(),
            user_id: owner.as_str().to_string(),
            created_at: (self.clock)(),
            completed_dates: habit.completed_dates.to_strings(),
        };
        let id = self
            .store
            .create(owner, document)
            .await
            .inspect_err(|err| tracing::warn!(%err, "failed to add habit"))?;
        tracing::info!(habit = %id, "habit added");
        Ok(())
    }

    /// Replaces the whole completed-date set. Concurrent writers race and the
    /// last write wins.
    #[instrument(skip(self, completed_dates))]
    pub async fn toggle_completion(
        &self,
        owner: &UserId,
        habit_id: &HabitId,
        completed_dates: &CompletedDates,
    ) -> Result<()> {
        let patch = HabitPatch::completed_dates(completed_dates.to_strings());
        self.store
            .update(owner, habit_id, patch)
            .await
            .inspect_err(|err| tracing::warn!(%err, "failed to update habit"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_habit(&self, owner: &UserId, habit_id: &HabitId) -> Result<()> {
        self.store
            .delete(owner, habit_id)
            .await
            .inspect_err(|err| tracing::warn!(%err, "failed to delete habit"))?;
        tracing::info!(habit = %habit_id, "habit deleted");
        Ok(())
    }
}

/// Converts raw store documents into the owner's habit list, newest first.
pub fn normalize_snapshot(owner: &UserId, snapshot: Vec<StoredHabit>) -> Vec<Habit> {
    let mut habits: Vec<Habit> = snapshot
        .into_iter()
        .filter_map(|stored| {
            if stored.document.user_id != owner.as_str() {
                tracing::warn!(habit = %stored.id, "dropping habit owned by another user");
                return None;
            }
            Some(normalize_document(stored))
        })
        .collect();
    habits.sort_by_key(|habit| Reverse(habit.created_at));
    habits
}

fn normalize_document(stored: StoredHabit) -> Habit {
    let StoredHabit { id, document } = stored;
    let completed_dates = document
        .completed_dates
        .iter()
        .filter_map(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                tracing::warn!(habit = %id, value = %raw, "ignoring malformed completion date");
            }
            parsed
        })
        .collect();
    Habit {
        id,
        name: document.name,
        owner_id: UserId::new(document.user_id),
        created_at: document.created_at,
        completed_dates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn stored(id: &str, owner: &str, hour: u32, dates: &[&str]) -> StoredHabit {
        StoredHabit {
            id: HabitId::new(id),
            document: HabitDocument {
                name: id.to_uppercase(),
                user_id: owner.into(),
                created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
                completed_dates: dates.iter().map(|d| d.to_string()).collect(),
            },
        }
    }

    #[test]
    fn normalization_orders_filters_and_cleans_dates() {
        let owner = UserId::new("u1");
        let habits = normalize_snapshot(
            &owner,
            vec![
                stored("old", "u1", 1, &["2024-06-09", "2024-06-09", "not-a-date"]),
                stored("foreign", "u2", 5, &[]),
                stored("new", "u1", 3, &["2024-06-10T07:00:00Z", "2024-06-10"]),
            ],
        );

        let ids: Vec<&str> = habits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(habits[1].completed_dates.to_strings(), vec!["2024-06-09"]);
        assert_eq!(
            habits[0].completed_dates.iter().collect::<Vec<_>>(),
            vec![NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()]
        );
        assert_eq!(habits[0].owner_id, owner);
    }
}
