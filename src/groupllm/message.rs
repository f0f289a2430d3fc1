//! The message record shared by every part of the engine.
//!
//! A [`Message`] is immutable once built: the fields are private and only
//! readable through accessors. New information is recorded by appending new
//! messages to the conversation history, never by editing old ones.
//!
//! # Example
//!
//! ```
//! use groupllm::message::{Message, Role};
//!
//! let msg = Message::human("status?", "Alice", Some("Bob".to_string())).unwrap();
//! assert_eq!(msg.role(), Role::Human);
//! assert_eq!(msg.target(), Some("Bob"));
//! assert!(!msg.is_public());
//!
//! assert!(Message::agent("hi", "", None).is_err());
//! ```

use std::error::Error;
use std::fmt;

/// Sender name used for messages the engine authors itself.
pub const SYSTEM_SENDER: &str = "System";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The single human participant.
    Human,
    /// One of the LLM-backed agents.
    Agent,
    /// Engine notices, persona reminders and other bookkeeping.
    System,
}

impl Role {
    /// Role string used on the completion wire format.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Role::Human => "user",
            Role::Agent => "assistant",
            Role::System => "system",
        }
    }
}

/// Error returned when a message cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The sender name was empty (or whitespace only).
    EmptySender,
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::EmptySender => write!(f, "Message sender name must not be empty"),
        }
    }
}

impl Error for MessageError {}

/// One utterance in the group conversation.
///
/// `target` is only set when the author explicitly addressed a single agent
/// with a leading `@name`; a message without a target is public.
/// `persona_owner` marks system messages that carry one agent's persona
/// prompt, so other agents' context views can leave them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
    sender_name: String,
    target: Option<String>,
    persona_owner: Option<String>,
}

impl Message {
    /// Build a message. Fails only when `sender_name` is empty.
    pub fn new(
        role: Role,
        content: impl Into<String>,
        sender_name: impl Into<String>,
        target: Option<String>,
    ) -> Result<Self, MessageError> {
        let sender_name = sender_name.into();
        if sender_name.trim().is_empty() {
            return Err(MessageError::EmptySender);
        }
        Ok(Self {
            role,
            content: content.into(),
            sender_name,
            target,
            persona_owner: None,
        })
    }

    /// A message typed by the human participant.
    pub fn human(
        content: impl Into<String>,
        sender_name: impl Into<String>,
        target: Option<String>,
    ) -> Result<Self, MessageError> {
        Self::new(Role::Human, content, sender_name, target)
    }

    /// A reply produced by an agent.
    pub fn agent(
        content: impl Into<String>,
        sender_name: impl Into<String>,
        target: Option<String>,
    ) -> Result<Self, MessageError> {
        Self::new(Role::Agent, content, sender_name, target)
    }

    /// A public notice authored by the engine.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            sender_name: SYSTEM_SENDER.to_string(),
            target: None,
            persona_owner: None,
        }
    }

    /// A system message holding `agent_name`'s persona prompt.
    pub fn persona_reminder(agent_name: &str, persona_prompt: &str) -> Self {
        Self {
            role: Role::System,
            content: format!("Persona of agent {}: {}", agent_name, persona_prompt),
            sender_name: SYSTEM_SENDER.to_string(),
            target: None,
            persona_owner: Some(agent_name.to_string()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Agent whose persona this message carries, if it is a persona reminder.
    pub fn persona_owner(&self) -> Option<&str> {
        self.persona_owner.as_deref()
    }

    /// `true` when the message has no explicit addressee.
    pub fn is_public(&self) -> bool {
        self.target.is_none()
    }

    pub fn is_persona_reminder(&self) -> bool {
        self.persona_owner.is_some()
    }
}
