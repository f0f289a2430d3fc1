//! Configuration for a group-chat session.
//!
//! [`GroupChatConfig`] lists every setting the engine reads, with its
//! default. Defaults are applied once, when the config is built or loaded,
//! instead of at each call site. Settings live in a
//! [`ConfigStore`](crate::store::ConfigStore) under the field names below.
//!
//! # Example
//!
//! ```rust
//! use groupllm::GroupChatConfig;
//!
//! let config = GroupChatConfig::default();
//! assert_eq!(config.max_agent_turns, 10);
//! assert_eq!(config.base_url, "https://api.openai.com/v1");
//!
//! let broken = GroupChatConfig { max_agent_turns: 0, ..GroupChatConfig::default() };
//! assert!(broken.validate().is_err());
//! ```

use crate::groupllm::clients::common::validate_base_url;
use crate::groupllm::store::{ConfigStore, StoreError};
use crate::groupllm::registry::RegistryError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Errors raised when a setting is rejected.
#[derive(Debug)]
pub enum ConfigError {
    /// The autonomous turn limit must be at least 1.
    InvalidTurnLimit(usize),
    /// The request timeout must be at least one second.
    InvalidTimeout(u64),
    /// The completion endpoint is not of the form `http(s)://host/v<N>`.
    InvalidBaseUrl(String),
    /// The human's display name is empty.
    EmptyUserName,
    /// The human's display name is already used by an agent.
    UserNameTaken(String),
    /// The registry rejected the name for another reason.
    InvalidUserName(String),
    /// Persisting the setting failed; nothing was applied.
    Store(StoreError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidTurnLimit(n) => {
                write!(f, "Invalid turn limit {}: must be at least 1", n)
            }
            ConfigError::InvalidTimeout(n) => {
                write!(f, "Invalid timeout {}s: must be at least 1", n)
            }
            ConfigError::InvalidBaseUrl(url) => write!(
                f,
                "Invalid base URL '{}': expected e.g. https://api.openai.com/v1",
                url
            ),
            ConfigError::EmptyUserName => write!(f, "User name must not be empty"),
            ConfigError::UserNameTaken(name) => {
                write!(f, "User name '{}' is already used by an agent", name)
            }
            ConfigError::InvalidUserName(reason) => write!(f, "Invalid user name: {}", reason),
            ConfigError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ConfigError {}

impl From<StoreError> for ConfigError {
    fn from(e: StoreError) -> Self {
        ConfigError::Store(e)
    }
}

impl From<RegistryError> for ConfigError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Store(e) => ConfigError::Store(e),
            RegistryError::DuplicateName(name) | RegistryError::ReservedName(name) => {
                ConfigError::UserNameTaken(name)
            }
            RegistryError::InvalidName(reason) => ConfigError::InvalidUserName(reason),
            RegistryError::UnknownAgent(name) => {
                ConfigError::InvalidUserName(format!("unknown agent '{}'", name))
            }
        }
    }
}

/// Sampling parameters forwarded with every completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub temperature: f32,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop: None,
        }
    }
}

/// Every setting a group-chat session reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupChatConfig {
    /// Bearer token for the completion endpoint. Empty means no header.
    pub api_key: String,
    /// Endpoint root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    /// Model used unless an agent overrides it.
    pub model: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Optional HTTP(S) proxy URL.
    pub proxy: Option<String>,
    /// The human participant's display name.
    pub user_name: String,
    /// Whether agent messages may trigger further agent replies.
    pub allow_agent_conversations: bool,
    /// Autonomous rounds allowed between two human messages.
    pub max_agent_turns: usize,
    /// Pause between two responders of the same round, in milliseconds.
    pub inter_call_delay_ms: u64,
    pub sampling: SamplingParameters,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            timeout_secs: 30,
            proxy: None,
            user_name: "User".to_string(),
            allow_agent_conversations: true,
            max_agent_turns: 10,
            inter_call_delay_ms: 1000,
            sampling: SamplingParameters::default(),
        }
    }
}

fn setting<T: DeserializeOwned + Serialize>(store: &dyn ConfigStore, key: &str, default: T) -> T {
    let fallback = match serde_json::to_value(&default) {
        Ok(value) => value,
        Err(_) => return default,
    };
    match serde_json::from_value(store.load_setting(key, fallback)) {
        Ok(value) => value,
        Err(e) => {
            log::warn!(
                "groupllm::config: setting '{}' has an unexpected type ({}); using default",
                key,
                e
            );
            default
        }
    }
}

impl GroupChatConfig {
    /// Read every setting from `store`, defaulting what is absent or
    /// mistyped, then validate the result.
    pub fn load(store: &dyn ConfigStore) -> Result<Self, ConfigError> {
        let d = Self::default();
        let config = Self {
            api_key: setting(store, "api_key", d.api_key),
            base_url: setting(store, "base_url", d.base_url),
            model: setting(store, "model", d.model),
            timeout_secs: setting(store, "timeout_secs", d.timeout_secs),
            proxy: setting::<Option<String>>(store, "proxy", d.proxy)
                .filter(|p| !p.trim().is_empty()),
            user_name: setting(store, "user_name", d.user_name),
            allow_agent_conversations: setting(
                store,
                "allow_agent_conversations",
                d.allow_agent_conversations,
            ),
            max_agent_turns: setting(store, "max_agent_turns", d.max_agent_turns),
            inter_call_delay_ms: setting(store, "inter_call_delay_ms", d.inter_call_delay_ms),
            sampling: setting(store, "sampling", d.sampling),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate, then write every setting to `store`.
    pub fn save(&self, store: &dyn ConfigStore) -> Result<(), ConfigError> {
        self.validate()?;
        let entries: Vec<(&str, Value)> = vec![
            ("api_key", Value::from(self.api_key.clone())),
            ("base_url", Value::from(self.base_url.clone())),
            ("model", Value::from(self.model.clone())),
            ("timeout_secs", Value::from(self.timeout_secs)),
            ("proxy", serde_json::to_value(&self.proxy).unwrap_or(Value::Null)),
            ("user_name", Value::from(self.user_name.clone())),
            ("allow_agent_conversations", Value::from(self.allow_agent_conversations)),
            ("max_agent_turns", Value::from(self.max_agent_turns)),
            ("inter_call_delay_ms", Value::from(self.inter_call_delay_ms)),
            ("sampling", serde_json::to_value(&self.sampling).unwrap_or(Value::Null)),
        ];
        for (key, value) in entries {
            store.save_setting(key, value)?;
        }
        Ok(())
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_agent_turns < 1 {
            return Err(ConfigError::InvalidTurnLimit(self.max_agent_turns));
        }
        if self.timeout_secs < 1 {
            return Err(ConfigError::InvalidTimeout(self.timeout_secs));
        }
        if self.user_name.trim().is_empty() {
            return Err(ConfigError::EmptyUserName);
        }
        if validate_base_url(&self.base_url).is_err() {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }
}
