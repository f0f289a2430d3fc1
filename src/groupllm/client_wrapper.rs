//! The completion boundary.
//!
//! A [`ClientWrapper`] turns one [`CompletionRequest`] into one
//! [`CompletionResponse`]. It keeps no conversation state of its own; the
//! dispatcher builds every request from scratch out of a context view. The
//! wire shapes here follow the OpenAI chat-completions format, extended with
//! the `name` and `target` fields every group-chat message carries.

use crate::groupllm::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// One entry of the request's `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        ChatMessage {
            role: message.role().as_wire_str().to_string(),
            content: message.content().to_string(),
            name: message.sender_name().to_string(),
            target: message.target().map(str::to_string),
        }
    }
}

/// Request body posted to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Request with the default temperature and no optional parameters.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: 0.7,
            top_p: None,
            max_tokens: None,
            presence_penalty: None,
            frequency_penalty: None,
            stop: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Response body returned by the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// Single-choice response, handy for mock clients.
    pub fn from_content(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: content.into(),
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    pub fn token_usage(&self) -> Option<TokenUsage> {
        self.usage.as_ref().map(|u| TokenUsage {
            input_tokens: u.prompt_tokens as usize,
            output_tokens: u.completion_tokens as usize,
            total_tokens: u.total_tokens as usize,
        })
    }
}

/// Failures at the completion boundary. Each one is scoped to a single
/// responder in a single round.
#[derive(Debug)]
pub enum ClientError {
    /// The request never produced a response (connection refused, reset...).
    Transport(String),
    /// No response within the configured timeout.
    Timeout,
    /// Non-2xx status; `body` is an excerpt of the response text.
    Status { status: u16, body: String },
    /// The response was not JSON.
    UnexpectedContentType(String),
    /// The body was JSON but not a completion response.
    MalformedBody(String),
    /// The response carried no choices.
    EmptyChoices,
    InvalidBaseUrl(String),
    /// The underlying HTTP client could not be constructed.
    HttpClient(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "Request failed: {}", e),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Status { status, body } => {
                write!(f, "API returned status {}: {}", status, body)
            }
            ClientError::UnexpectedContentType(ct) => {
                write!(f, "Unexpected response content type '{}'", ct)
            }
            ClientError::MalformedBody(e) => write!(f, "Malformed response body: {}", e),
            ClientError::EmptyChoices => write!(f, "Response contained no choices"),
            ClientError::InvalidBaseUrl(url) => write!(f, "Invalid base URL: {}", url),
            ClientError::HttpClient(e) => write!(f, "Could not build HTTP client: {}", e),
        }
    }
}

impl Error for ClientError {}

/// Trait defining the interface to a chat-completion service.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Model used when an agent does not override it.
    fn model_name(&self) -> &str;

    /// Send one request and return the parsed response.
    async fn chat_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ClientError>;

    /// Usage from the *last* `chat_completion()` call.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    /// Wrappers that track usage override this with their slot.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
