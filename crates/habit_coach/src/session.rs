use std::sync::Arc;

use chrono::NaiveDate;
use habit_core::{format_context, today_local, ChatMessage, Habit};
use parking_lot::Mutex;

use crate::completion::CompletionService;

pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

const COACH_INSTRUCTIONS: &str = "You are a helpful coach focused on helping me achieve my goals \
and personal development. Here is the current status of my habits. Please format your response \
using markdown for better readability. Use ** for bold text, * for italics, and proper markdown \
headings (##) for sections. Use bullet points (-) for lists where appropriate.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Idle,
    /// A request is in flight; further sends are rejected until it settles.
    Awaiting,
    /// Same as `Idle`, but the last request failed.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyMessage,
    RequestInFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Replied,
    /// The fallback reply was appended in place of an answer.
    Failed,
    Rejected(RejectReason),
}

struct Inner {
    history: Vec<ChatMessage>,
    state: ChatState,
}

/// One conversation with the coach.
///
/// Every turn carries the current habit status. At most one request is
/// outstanding; history lives only as long as the session.
pub struct ChatSession {
    service: Arc<dyn CompletionService>,
    today: Arc<dyn Fn() -> NaiveDate + Send + Sync>,
    inner: Mutex<Inner>,
}

impl ChatSession {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self {
            service,
            today: Arc::new(today_local),
            inner: Mutex::new(Inner {
                history: Vec::new(),
                state: ChatState::Idle,
            }),
        }
    }

    /// Overrides how "today" is determined when building the habit context.
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn state(&self) -> ChatState {
        self.inner.lock().state
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.inner.lock().history.clone()
    }

    pub async fn send(&self, user_text: &str, habits: &[Habit]) -> SendOutcome {
        let text = user_text.trim();
        if text.is_empty() {
            return SendOutcome::Rejected(RejectReason::EmptyMessage);
        }

        let turn = {
            let mut inner = self.inner.lock();
            if inner.state == ChatState::Awaiting {
                tracing::debug!("chat request already in flight; send rejected");
                return SendOutcome::Rejected(RejectReason::RequestInFlight);
            }
            inner.history.push(ChatMessage::user(text));
            inner.state = ChatState::Awaiting;
            PendingTurn {
                inner: &self.inner,
                settled: false,
            }
        };

        let prompt = build_prompt(habits, (self.today)(), text);
        match self.service.complete(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                turn.settle(ChatMessage::assistant(reply), ChatState::Idle);
                SendOutcome::Replied
            }
            Ok(_) => {
                tracing::warn!("coach returned an empty reply");
                turn.settle(ChatMessage::assistant(FALLBACK_REPLY), ChatState::Failed);
                SendOutcome::Failed
            }
            Err(err) => {
                tracing::warn!(%err, "coach request failed");
                turn.settle(ChatMessage::assistant(FALLBACK_REPLY), ChatState::Failed);
                SendOutcome::Failed
            }
        }
    }
}

/// The outstanding request of a session.
///
/// Dropped unsettled (the `send` future was cancelled mid-request), it
/// records the fallback reply and leaves the session in `Failed`.
struct PendingTurn<'a> {
    inner: &'a Mutex<Inner>,
    settled: bool,
}

impl PendingTurn<'_> {
    fn settle(mut self, reply: ChatMessage, state: ChatState) {
        self.settled = true;
        let mut inner = self.inner.lock();
        inner.history.push(reply);
        inner.state = state;
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        tracing::warn!("coach request abandoned before it settled");
        let mut inner = self.inner.lock();
        inner.history.push(ChatMessage::assistant(FALLBACK_REPLY));
        inner.state = ChatState::Failed;
    }
}

/// Habit status, then the user's message, then the coaching instructions.
pub fn build_prompt(habits: &[Habit], today: NaiveDate, user_text: &str) -> String {
    format!(
        "{}\n\nUser message: {}\n\n{}",
        format_context(habits, today),
        user_text,
        COACH_INSTRUCTIONS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_places_context_before_message_and_instructions() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        let prompt = build_prompt(&[], today, "How am I doing?");
        assert!(prompt.starts_with("Here's my current habits status:\n\n"));
        let message_at = prompt.find("User message: How am I doing?").unwrap();
        let instructions_at = prompt.find("markdown").unwrap();
        assert!(message_at < instructions_at);
    }
}
