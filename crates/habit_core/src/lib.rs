pub mod auth;
pub mod context;
pub mod error;
pub mod habit;
pub mod memory;
pub mod message;
pub mod service;
pub mod store;
pub mod streak;

pub use crate::auth::{AuthState, CredentialProvider};
pub use crate::context::format_context;
pub use crate::error::{HabitError, StoreError};
pub use crate::habit::{today_local, CompletedDates, Habit, HabitId, NewHabit, UserId};
pub use crate::memory::InMemoryDocumentStore;
pub use crate::message::ChatMessage;
pub use crate::service::{HabitStore, HabitStoreBuilder};
pub use crate::store::{DocumentStore, Subscription};
pub use crate::streak::compute_streak;
