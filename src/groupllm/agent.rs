//! Agent definitions.
//!
//! An [`AgentDefinition`] describes one participant: its unique name, the
//! persona prompt it is given, whether it is enabled, and its auto-respond
//! policy. Definitions are plain values; the [`AgentRegistry`](crate::registry::AgentRegistry)
//! replaces them whole and never mutates one that a reader may hold.
//!
//! The on-disk field names of older group-chat configurations (`prompt`,
//! `auto_respond_to_ai`, `auto_respond_to_all`, `color`) are accepted as
//! aliases when deserialising.
//!
//! ```
//! use groupllm::agent::AgentDefinition;
//!
//! let ann = AgentDefinition::new("Ann")
//!     .with_persona("You are a cheerful botanist.")
//!     .with_auto_respond_to_public(true);
//!
//! assert!(ann.enabled);
//! assert!(ann.auto_respond_to_agents);
//! assert!(ann.auto_respond_to_public);
//! ```

use serde::{Deserialize, Serialize};

/// Palette assigned to agents that have no configured colour, by sorted index.
pub const DEFAULT_AGENT_COLORS: [&str; 4] = ["#228b22", "#9933ff", "#ff6600", "#cc0000"];

fn default_true() -> bool {
    true
}

/// Definition of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique, non-empty name. Also the `@name` token used to address it.
    pub name: String,

    /// Persona prompt placed at the top of every request for this agent.
    #[serde(default, alias = "prompt")]
    pub persona_prompt: String,

    /// Prompt-library file the persona was loaded from, if any.
    #[serde(default)]
    pub prompt_file: Option<String>,

    /// Disabled agents stay in storage but receive no traffic.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reply to public messages written by other agents.
    #[serde(default = "default_true", alias = "auto_respond_to_ai")]
    pub auto_respond_to_agents: bool,

    /// Reply to public messages in general.
    #[serde(default, alias = "auto_respond_to_all")]
    pub auto_respond_to_public: bool,

    /// Presentation colour. Opaque to the engine.
    #[serde(default, alias = "color")]
    pub display_color: Option<String>,

    /// Model override for this agent's completion requests.
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentDefinition {
    /// Enabled agent with no persona that answers other agents but not the
    /// public channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona_prompt: String::new(),
            prompt_file: None,
            enabled: true,
            auto_respond_to_agents: true,
            auto_respond_to_public: false,
            display_color: None,
            model: None,
        }
    }

    pub fn with_persona(mut self, persona_prompt: impl Into<String>) -> Self {
        self.persona_prompt = persona_prompt.into();
        self
    }

    pub fn with_prompt_file(mut self, prompt_file: impl Into<String>) -> Self {
        self.prompt_file = Some(prompt_file.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_auto_respond_to_agents(mut self, auto_respond: bool) -> Self {
        self.auto_respond_to_agents = auto_respond;
        self
    }

    pub fn with_auto_respond_to_public(mut self, auto_respond: bool) -> Self {
        self.auto_respond_to_public = auto_respond;
        self
    }

    pub fn with_display_color(mut self, color: impl Into<String>) -> Self {
        self.display_color = Some(color.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn has_persona(&self) -> bool {
        !self.persona_prompt.trim().is_empty()
    }
}

/// Reason a proposed agent name is unusable, or `None` if it is fine.
///
/// Names double as `@name` tokens and storage file stems, so they may not be
/// empty, contain whitespace, or contain path separators.
pub fn name_problem(name: &str) -> Option<&'static str> {
    if name.trim().is_empty() {
        Some("name must not be empty")
    } else if name.chars().any(char::is_whitespace) {
        Some("name must not contain whitespace")
    } else if name.contains('/') || name.contains('\\') {
        Some("name must not contain path separators")
    } else if name.starts_with('@') {
        Some("name must not start with '@'")
    } else {
        None
    }
}
