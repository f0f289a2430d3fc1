//! Session event system.
//!
//! Implement [`EventHandler`] to observe what a [`GroupChat`](crate::session::GroupChat)
//! is doing: round boundaries, which agents were picked, each completion
//! call's outcome, turn-limit halts and history resets. Committed messages
//! themselves are published on the session's broadcast stream
//! ([`GroupChat::subscribe`](crate::session::GroupChat::subscribe)); events
//! describe the work around them.
//!
//! The handler is shared as `Arc<dyn EventHandler>` and awaited inline, so
//! it should return quickly.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupllm::event::{EventHandler, SessionEvent};
//! use async_trait::async_trait;
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl EventHandler for PrintHandler {
//!     async fn on_session_event(&self, event: &SessionEvent) {
//!         match event {
//!             SessionEvent::AgentFailed { agent, error, .. } => {
//!                 eprintln!("{} failed: {}", agent, error);
//!             }
//!             other => println!("{:?}", other),
//!         }
//!     }
//! }
//! ```

use crate::groupllm::client_wrapper::TokenUsage;
use crate::groupllm::message::Message;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A dispatch round began. `responders` is the eligible set, in the
    /// order they will be called.
    RoundStarted {
        round_id: String,
        trigger_sender: String,
        autonomous: bool,
        responders: Vec<String>,
    },

    /// `agent` is about to be called.
    AgentSelected { round_id: String, agent: String },

    /// The exact view sent for `agent`. Only emitted in developer mode.
    ContextBuilt {
        round_id: String,
        agent: String,
        view: Vec<Message>,
    },

    AgentResponded {
        round_id: String,
        agent: String,
        /// Addressee parsed from the reply, if any.
        target: Option<String>,
        tokens_used: Option<TokenUsage>,
    },

    AgentFailed {
        round_id: String,
        agent: String,
        error: String,
    },

    RoundFinished {
        round_id: String,
        autonomous: bool,
        responded: usize,
        failed: usize,
    },

    /// An autonomous round was refused because the turn budget ran out.
    TurnLimitReached { max_turns: usize },

    /// The history was reset to the persona seed.
    HistoryCleared,
}

/// Receives [`SessionEvent`]s. The default implementation ignores them.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_session_event(&self, _event: &SessionEvent) {}
}
