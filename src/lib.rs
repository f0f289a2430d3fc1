//! # GroupLLM
//!
//! GroupLLM runs a group chat between one human and any number of LLM-backed
//! agents. Each agent is a persona on top of a chat-completion endpoint; the
//! crate decides who sees what, who answers, and when the agents have talked
//! among themselves for long enough.
//!
//! The crate is layered bottom-up:
//!
//! * **Messages and addressing**: [`message::Message`] records every utterance;
//!   [`mention::parse`] recognises a leading `@name` that addresses one agent.
//! * **Agents**: [`agent::AgentDefinition`] holds a persona and an
//!   auto-respond policy; the [`registry::AgentRegistry`] owns them and hands
//!   out immutable snapshots.
//! * **Per-agent context**: [`context::build_view`] filters the history down
//!   to what one agent may see. An agent never observes messages addressed to
//!   somebody else.
//! * **Turn control**: [`turn::TurnController`] bounds the agent-to-agent
//!   feedback loop to a configurable number of rounds per human message.
//! * **Dispatch**: [`dispatcher::ResponseDispatcher`] runs one round, calling
//!   each eligible agent in turn through a [`ClientWrapper`].
//! * **Session**: [`GroupChat`] serialises every message through a single
//!   queue consumer and publishes commits to subscribers.
//!
//! Configuration and agent definitions are read through a
//! [`store::ConfigStore`]; [`store::JsonFileStore`] keeps them as JSON files
//! on disk.
//!
//! ## Running a conversation
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use groupllm::agent::AgentDefinition;
//! use groupllm::client_wrapper::{ClientError, ClientWrapper, CompletionRequest, CompletionResponse};
//! use groupllm::registry::AgentRegistry;
//! use groupllm::store::MemoryStore;
//! use groupllm::{GroupChat, GroupChatConfig};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ClientWrapper for Echo {
//!     fn model_name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn chat_completion(
//!         &self,
//!         request: &CompletionRequest,
//!     ) -> Result<CompletionResponse, ClientError> {
//!         let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
//!         Ok(CompletionResponse::from_content("echo", format!("You said: {}", last)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new().with_agents(vec![
//!         AgentDefinition::new("Ann").with_auto_respond_to_public(true),
//!     ]));
//!     let config = GroupChatConfig {
//!         user_name: "Alice".into(),
//!         allow_agent_conversations: false,
//!         inter_call_delay_ms: 0,
//!         ..GroupChatConfig::default()
//!     };
//!     let registry = Arc::new(AgentRegistry::load(store, &config.user_name)?);
//!     let chat = GroupChat::builder(config, registry, Arc::new(Echo)).start()?;
//!
//!     chat.send_human_message("hello")?;
//!     chat.wait_idle().await;
//!
//!     let history = chat.history();
//!     assert_eq!(history.last().unwrap().content(), "You said: hello");
//!     chat.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding GroupLLM opt in to `RUST_LOG` driven diagnostics
/// with this call; the library itself only ever logs through the `log` facade.
///
/// ```rust
/// groupllm::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `groupllm` module.
pub mod groupllm;

// Re-exporting key items for easier external access.
pub use groupllm::agent;
pub use groupllm::agent::AgentDefinition;
pub use groupllm::client_wrapper;
pub use groupllm::client_wrapper::{ClientWrapper, TokenUsage};
pub use groupllm::clients;
pub use groupllm::config;
pub use groupllm::config::{ConfigError, GroupChatConfig, SamplingParameters};
pub use groupllm::context;
pub use groupllm::dispatcher;
pub use groupllm::event;
pub use groupllm::event::{EventHandler, SessionEvent};
pub use groupllm::mention;
pub use groupllm::message;
pub use groupllm::message::{Message, Role};
pub use groupllm::queue::CommittedMessage;
pub use groupllm::registry;
pub use groupllm::registry::{AgentRegistry, Roster};
pub use groupllm::session;
pub use groupllm::session::{ConversationState, GroupChat, SessionError};
pub use groupllm::store;
pub use groupllm::store::{ConfigStore, JsonFileStore, MemoryStore};
pub use groupllm::turn;
pub use groupllm::turn::{TurnController, TurnStatus};
