pub mod completion;
pub mod gemini;
pub mod session;

pub use crate::completion::{CompletionError, CompletionService};
pub use crate::gemini::GeminiCompletionService;
pub use crate::session::{ChatSession, ChatState, RejectReason, SendOutcome};
