//! A running group-chat conversation.
//!
//! [`GroupChat`] is the context object every operation goes through. It
//! owns the orchestration queue's consumer task, so several independent
//! conversations can run side by side in one process. The presentation
//! layer submits messages, watches [`subscribe`](GroupChat::subscribe) for
//! commits, and reads [`turn_status`](GroupChat::turn_status) for display.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use groupllm::clients::openai_compatible::OpenAICompatibleClient;
//! use groupllm::registry::AgentRegistry;
//! use groupllm::store::{ConfigStore, JsonFileStore};
//! use groupllm::{GroupChat, GroupChatConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     groupllm::init_logger();
//!     let store: Arc<dyn ConfigStore> = Arc::new(JsonFileStore::open("./groupchat")?);
//!     let config = GroupChatConfig::load(store.as_ref())?;
//!     let registry = Arc::new(AgentRegistry::load(Arc::clone(&store), &config.user_name)?);
//!     let client = Arc::new(OpenAICompatibleClient::from_config(&config)?);
//!
//!     let chat = GroupChat::builder(config, registry, client).start()?;
//!     let mut commits = chat.subscribe();
//!
//!     chat.send_human_message("@Ann what should we plant this spring?")?;
//!     chat.wait_idle().await;
//!     while let Ok(committed) = commits.try_recv() {
//!         let m = committed.message;
//!         println!("{}: {}", m.sender_name(), m.content());
//!     }
//!     chat.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::groupllm::client_wrapper::ClientWrapper;
use crate::groupllm::config::{ConfigError, GroupChatConfig};
use crate::groupllm::context::{build_view, persona_seed};
use crate::groupllm::dispatcher::ResponseDispatcher;
use crate::groupllm::event::EventHandler;
use crate::groupllm::mention;
use crate::groupllm::message::{Message, MessageError};
use crate::groupllm::queue::{CommittedMessage, Consumer, QueueHandle, QueueItem, SessionState};
use crate::groupllm::registry::{AgentRegistry, RegistryError};
use crate::groupllm::turn::{TurnController, TurnStatus};
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Capacity of the commit notification channel. Slow subscribers lag.
const NOTIFICATION_CAPACITY: usize = 1024;

#[derive(Debug)]
pub enum SessionError {
    /// The queue consumer has shut down.
    Closed,
    /// Nothing left to send after trimming.
    EmptyMessage,
    Message(MessageError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Closed => write!(f, "Group chat session has shut down"),
            SessionError::EmptyMessage => write!(f, "Message is empty"),
            SessionError::Message(e) => write!(f, "{}", e),
        }
    }
}

impl Error for SessionError {}

impl From<MessageError> for SessionError {
    fn from(e: MessageError) -> Self {
        SessionError::Message(e)
    }
}

/// Point-in-time copy of the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    pub history: Vec<Message>,
    pub turn_count: usize,
    pub loop_enabled: bool,
}

pub struct GroupChatBuilder {
    config: GroupChatConfig,
    registry: Arc<AgentRegistry>,
    client: Arc<dyn ClientWrapper>,
    event_handler: Option<Arc<dyn EventHandler>>,
    dev_mode: bool,
    loop_enabled: bool,
}

impl GroupChatBuilder {
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    pub fn with_loop_enabled(mut self, enabled: bool) -> Self {
        self.loop_enabled = enabled;
        self
    }

    /// Validate the configuration and spawn the queue consumer. Must be
    /// called from within a Tokio runtime.
    pub fn start(self) -> Result<GroupChat, ConfigError> {
        self.config.validate()?;

        let mut turns = TurnController::new(self.config.max_agent_turns)?;
        turns.set_loop_enabled(self.loop_enabled);
        let turns = Arc::new(Mutex::new(turns));

        let mut dispatcher = ResponseDispatcher::new(self.client, Arc::clone(&turns))
            .with_sampling(self.config.sampling.clone())
            .with_inter_call_delay(self.config.inter_call_delay());
        if let Some(handler) = &self.event_handler {
            dispatcher = dispatcher.with_event_handler(Arc::clone(handler));
        }

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let state = Arc::new(SessionState {
            history: RwLock::new(persona_seed(&self.registry.snapshot())),
            turns,
            allow_agent_conversations: AtomicBool::new(self.config.allow_agent_conversations),
            dev_mode: AtomicBool::new(self.dev_mode),
            notifications,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0usize);
        let queue = QueueHandle::new(tx, Arc::new(outstanding));

        let consumer = Consumer::new(
            Arc::clone(&state),
            Arc::clone(&self.registry),
            Arc::new(dispatcher),
            self.event_handler,
            queue.clone(),
            rx,
        );
        let handle = tokio::spawn(consumer.run());

        log::info!(
            "groupllm::session: started with {} active agents",
            self.registry.snapshot().active_agents().len()
        );
        Ok(GroupChat {
            state,
            registry: self.registry,
            queue,
            consumer: Mutex::new(Some(handle)),
        })
    }
}

pub struct GroupChat {
    state: Arc<SessionState>,
    registry: Arc<AgentRegistry>,
    queue: QueueHandle,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl GroupChat {
    pub fn builder(
        config: GroupChatConfig,
        registry: Arc<AgentRegistry>,
        client: Arc<dyn ClientWrapper>,
    ) -> GroupChatBuilder {
        GroupChatBuilder {
            config,
            registry,
            client,
            event_handler: None,
            dev_mode: false,
            loop_enabled: false,
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Enqueue a message. It is appended to history in submission order.
    pub fn submit(&self, message: Message) -> Result<(), SessionError> {
        if self.queue.push(QueueItem::Commit {
            message,
            epoch: None,
        }) {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    /// Parse the human's raw input (a leading `@name` addresses one active
    /// agent) and submit it. Returns the message as it will be committed.
    pub fn send_human_message(&self, raw: &str) -> Result<Message, SessionError> {
        let roster = self.registry.snapshot();
        let parsed = mention::parse(raw, &roster.active_names());
        if parsed.content.is_empty() && parsed.target.is_none() {
            return Err(SessionError::EmptyMessage);
        }
        let message = Message::human(parsed.content, roster.human_name(), parsed.target)?;
        self.submit(message.clone())?;
        Ok(message)
    }

    /// Committed messages, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.state.history()
    }

    pub fn state(&self) -> ConversationState {
        let status = self.turn_status();
        ConversationState {
            history: self.history(),
            turn_count: status.turn_count,
            loop_enabled: status.loop_enabled,
        }
    }

    pub fn turn_status(&self) -> TurnStatus {
        self.state.turns().status()
    }

    /// What `agent_name` would be sent if it were called now.
    pub fn view_for(&self, agent_name: &str) -> Option<Vec<Message>> {
        let roster = self.registry.snapshot();
        let agent = roster.get(agent_name)?;
        Some(build_view(&self.history(), agent, &roster))
    }

    /// Stream of messages as they are committed.
    pub fn subscribe(&self) -> broadcast::Receiver<CommittedMessage> {
        self.state.notifications.subscribe()
    }

    /// Persisted. Values below 1 are rejected.
    pub fn set_max_turns(&self, max_turns: usize) -> Result<(), ConfigError> {
        if max_turns < 1 {
            log::warn!("groupllm::session: rejected turn limit {}", max_turns);
            return Err(ConfigError::InvalidTurnLimit(max_turns));
        }
        self.registry
            .store()
            .save_setting("max_agent_turns", json!(max_turns))?;
        self.state.turns().set_max_turns(max_turns)
    }

    /// Session-only; never persisted.
    pub fn set_loop_enabled(&self, enabled: bool) {
        self.state.turns().set_loop_enabled(enabled);
    }

    /// Persisted.
    pub fn set_allow_agent_conversations(&self, allowed: bool) -> Result<(), ConfigError> {
        self.registry
            .store()
            .save_setting("allow_agent_conversations", json!(allowed))?;
        self.state
            .allow_agent_conversations
            .store(allowed, Ordering::SeqCst);
        Ok(())
    }

    pub fn set_dev_mode(&self, enabled: bool) {
        self.state.dev_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn set_human_name(&self, name: &str) -> Result<(), ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyUserName);
        }
        self.registry.set_human_name(name).map_err(ConfigError::from)
    }

    /// Reset history to the persona seed and the turn count to zero.
    pub async fn clear(&self) -> Result<(), SessionError> {
        let (done, cleared) = oneshot::channel();
        if !self.queue.push(QueueItem::Clear { done }) {
            return Err(SessionError::Closed);
        }
        cleared.await.map_err(|_| SessionError::Closed)
    }

    pub fn reload_agents(&self) -> Result<(), RegistryError> {
        self.registry.reload()
    }

    /// Resolves once the queue is drained and no round is running or waiting.
    pub async fn wait_idle(&self) {
        let mut idle = self.queue.watch_outstanding();
        let _ = idle.wait_for(|n| *n == 0).await;
    }

    /// Stop the consumer after it has handled everything queued so far.
    pub async fn shutdown(self) {
        self.queue.push(QueueItem::Shutdown);
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("groupllm::session: consumer task failed: {}", e);
            }
        }
    }
}

impl Drop for GroupChat {
    fn drop(&mut self) {
        let running = self
            .consumer
            .lock()
            .map(|h| h.is_some())
            .unwrap_or(false);
        if running {
            self.queue.push(QueueItem::Shutdown);
        }
    }
}
