use thiserror::Error;

/// Failures reported by a document store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("habit `{0}` not found")]
    NotFound(String),
    #[error("store transport failure: {0}")]
    Transport(String),
    #[error("user `{user}` may not access habit `{id}`")]
    PermissionDenied { user: String, id: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HabitError {
    /// Rejected before any remote call was made.
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl HabitError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T, E = HabitError> = std::result::Result<T, E>;
