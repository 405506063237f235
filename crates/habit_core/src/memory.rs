use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::StoreError;
use crate::habit::{HabitId, UserId};
use crate::store::{
    sort_newest_first, DocumentStore, HabitDocument, HabitPatch, HabitQuery, SnapshotSink,
    StoredHabit, Subscription,
};

/// Document store kept entirely in process memory.
///
/// Writes commit under a lock and then push fresh snapshots to every
/// subscriber of the affected owner on the writer's task. Each snapshot
/// carries the commit sequence it was taken at; a subscriber never receives
/// a snapshot older than one it has already seen. Sinks must not write to
/// the store from inside the callback.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<HabitId, HabitDocument>,
    subscribers: HashMap<u64, Subscriber>,
    next_subscriber: u64,
    commit_seq: u64,
    offline: bool,
}

/// Commit sequence of the last snapshot handed to a sink.
type DeliveryGate = Arc<Mutex<Option<u64>>>;

struct Subscriber {
    query: HabitQuery,
    sink: SnapshotSink,
    gate: DeliveryGate,
}

struct Delivery {
    gate: DeliveryGate,
    sink: SnapshotSink,
    seq: u64,
    snapshot: Vec<StoredHabit>,
}

impl StoreState {
    fn snapshot(&self, query: &HabitQuery) -> Vec<StoredHabit> {
        let mut habits: Vec<StoredHabit> = self
            .documents
            .iter()
            .filter(|(_, document)| query.matches(document))
            .map(|(id, document)| StoredHabit {
                id: id.clone(),
                document: document.clone(),
            })
            .collect();
        sort_newest_first(&mut habits);
        habits
    }

    fn commit(&mut self, owner: &UserId) -> Vec<Delivery> {
        self.commit_seq += 1;
        self.subscribers
            .values()
            .filter(|subscriber| &subscriber.query.owner == owner)
            .map(|subscriber| Delivery {
                gate: subscriber.gate.clone(),
                sink: subscriber.sink.clone(),
                seq: self.commit_seq,
                snapshot: self.snapshot(&subscriber.query),
            })
            .collect()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Transport("store is unreachable".into()));
        }
        Ok(())
    }

    fn owned_document_mut(
        &mut self,
        owner: &UserId,
        id: &HabitId,
    ) -> Result<&mut HabitDocument, StoreError> {
        let document = self
            .documents
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if document.user_id != owner.as_str() {
            return Err(StoreError::PermissionDenied {
                user: owner.to_string(),
                id: id.to_string(),
            });
        }
        Ok(document)
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every operation fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.write().offline = offline;
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }

    pub fn documents_for(&self, owner: &UserId) -> Vec<StoredHabit> {
        self.state.read().snapshot(&HabitQuery::owned_by(owner.clone()))
    }

    fn deliver(deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let mut last = delivery.gate.lock();
            if last.is_some_and(|seen| seen >= delivery.seq) {
                tracing::trace!(seq = delivery.seq, "dropping stale snapshot");
                continue;
            }
            (delivery.sink)(delivery.snapshot);
            *last = Some(delivery.seq);
        }
    }

    fn unsubscribe(state: &Weak<RwLock<StoreState>>, key: u64) {
        if let Some(state) = state.upgrade() {
            if state.write().subscribers.remove(&key).is_some() {
                tracing::debug!(subscriber = key, "subscription cancelled");
            }
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn subscribe(
        &self,
        query: HabitQuery,
        sink: SnapshotSink,
    ) -> Result<Subscription, StoreError> {
        let (key, initial) = {
            let mut state = self.state.write();
            state.ensure_online()?;
            let key = state.next_subscriber;
            state.next_subscriber += 1;
            let gate = DeliveryGate::default();
            let initial = Delivery {
                gate: gate.clone(),
                sink: sink.clone(),
                seq: state.commit_seq,
                snapshot: state.snapshot(&query),
            };
            state.subscribers.insert(key, Subscriber { query, sink, gate });
            (key, initial)
        };
        tracing::debug!(
            subscriber = key,
            habits = initial.snapshot.len(),
            "subscription registered"
        );
        Self::deliver(vec![initial]);

        let weak = Arc::downgrade(&self.state);
        Ok(Subscription::new(move || Self::unsubscribe(&weak, key)))
    }

    async fn create(
        &self,
        owner: &UserId,
        document: HabitDocument,
    ) -> Result<HabitId, StoreError> {
        let id = HabitId::new(Uuid::new_v4().simple().to_string());
        let deliveries = {
            let mut state = self.state.write();
            state.ensure_online()?;
            if document.user_id != owner.as_str() {
                return Err(StoreError::PermissionDenied {
                    user: owner.to_string(),
                    id: id.to_string(),
                });
            }
            state.documents.insert(id.clone(), document);
            state.commit(owner)
        };
        tracing::debug!(habit = %id, owner = %owner, "habit document created");
        Self::deliver(deliveries);
        Ok(id)
    }

    async fn update(
        &self,
        owner: &UserId,
        id: &HabitId,
        patch: HabitPatch,
    ) -> Result<(), StoreError> {
        let deliveries = {
            let mut state = self.state.write();
            state.ensure_online()?;
            patch.apply(state.owned_document_mut(owner, id)?);
            state.commit(owner)
        };
        tracing::debug!(habit = %id, "habit document updated");
        Self::deliver(deliveries);
        Ok(())
    }

    async fn delete(&self, owner: &UserId, id: &HabitId) -> Result<(), StoreError> {
        let deliveries = {
            let mut state = self.state.write();
            state.ensure_online()?;
            state.owned_document_mut(owner, id)?;
            state.documents.remove(id);
            state.commit(owner)
        };
        tracing::debug!(habit = %id, "habit document deleted");
        Self::deliver(deliveries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    fn document(owner: &str, name: &str, hour: u32) -> HabitDocument {
        HabitDocument {
            name: name.into(),
            user_id: owner.into(),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            completed_dates: Vec::new(),
        }
    }

    fn recording_sink() -> (SnapshotSink, Arc<Mutex<Vec<Vec<String>>>>) {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let captured = seen.clone();
        let sink: SnapshotSink = Arc::new(move |snapshot: Vec<StoredHabit>| {
            captured
                .lock()
                .push(snapshot.into_iter().map(|h| h.document.name).collect());
        });
        (sink, seen)
    }

    #[tokio::test]
    async fn delivers_initial_and_per_write_snapshots_for_owner_only() {
        let store = InMemoryDocumentStore::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        store.create(&alice, document("alice", "Run", 1)).await.unwrap();

        let (sink, seen) = recording_sink();
        let _sub = store
            .subscribe(HabitQuery::owned_by(alice.clone()), sink)
            .await
            .unwrap();
        store.create(&bob, document("bob", "Swim", 2)).await.unwrap();
        store.create(&alice, document("alice", "Read", 3)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(*seen, vec![vec!["Run".to_string()], vec!["Read".into(), "Run".into()]]);
    }

    #[tokio::test]
    async fn refuses_other_users_documents() {
        let store = InMemoryDocumentStore::new();
        let alice = UserId::new("alice");
        let id = store.create(&alice, document("alice", "Run", 1)).await.unwrap();

        let err = store.delete(&UserId::new("bob"), &id).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        let err = store
            .create(&UserId::new("bob"), document("alice", "Sneaky", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
        assert_eq!(store.documents_for(&alice).len(), 1);
    }

    #[tokio::test]
    async fn dropping_handle_unregisters_subscriber() {
        let store = InMemoryDocumentStore::new();
        let (sink, _) = recording_sink();
        let sub = store
            .subscribe(HabitQuery::owned_by(UserId::new("alice")), sink)
            .await
            .unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn offline_store_rejects_writes() {
        let store = InMemoryDocumentStore::new();
        store.set_offline(true);
        let err = store
            .create(&UserId::new("alice"), document("alice", "Run", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[test]
    fn concurrent_writers_never_end_on_a_stale_snapshot() {
        let store = InMemoryDocumentStore::new();
        let alice = UserId::new("alice");
        let sizes: Arc<Mutex<Vec<usize>>> = Arc::default();
        let captured = sizes.clone();
        let sink: SnapshotSink = Arc::new(move |snapshot: Vec<StoredHabit>| {
            if snapshot.len() == 1 {
                std::thread::sleep(Duration::from_millis(200));
            }
            captured.lock().push(snapshot.len());
        });
        let runtime = || {
            tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap()
        };
        let _sub = runtime()
            .block_on(store.subscribe(HabitQuery::owned_by(alice.clone()), sink))
            .unwrap();

        std::thread::scope(|scope| {
            for (name, hour) in [("Run", 1), ("Read", 2)] {
                let store = store.clone();
                let alice = alice.clone();
                scope.spawn(move || {
                    runtime()
                        .block_on(store.create(&alice, document("alice", name, hour)))
                        .unwrap();
                });
            }
        });

        let sizes = sizes.lock();
        assert!(sizes.windows(2).all(|pair| pair[0] <= pair[1]), "{sizes:?}");
        assert_eq!(sizes.last(), Some(&2));
    }
}
