use async_trait::async_trait;
use thiserror::Error;

/// A text-in, text-out language model backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("completion quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("completion service returned no text")]
    EmptyResponse,
    #[error("completion service is not configured: {0}")]
    NotConfigured(String),
}
