//! The `OpenAICompatibleClient` struct implements `ClientWrapper` for any
//! endpoint that speaks the OpenAI chat-completions protocol (OpenAI itself,
//! Azure-style gateways, local servers such as llama.cpp or vLLM).
//!
//! # Key Features
//!
//! - **chat_completion(...)**: posts the request as JSON to `{base_url}/chat/completions`.
//! - **Strict response checks**: non-2xx status, a non-JSON content type, an
//!   unparsable body and an empty `choices` array are all reported as
//!   [`ClientError`]s.
//! - **Automatic Usage Capture**: the latest `TokenUsage` is stored and
//!   available through `get_last_usage()`.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupllm::client_wrapper::{ClientWrapper, CompletionRequest, ChatMessage};
//! use groupllm::clients::openai_compatible::OpenAICompatibleClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPEN_AI_SECRET")?;
//!     let client = OpenAICompatibleClient::new(&key, "https://api.openai.com/v1", "gpt-4o-mini")?;
//!
//!     let request = CompletionRequest::new(
//!         client.model_name(),
//!         vec![ChatMessage {
//!             role: "user".into(),
//!             content: "Hello!".into(),
//!             name: "Alice".into(),
//!             target: None,
//!         }],
//!     );
//!     let response = client.chat_completion(&request).await?;
//!     println!("{:?}", response.first_content());
//!     println!("{:?}", client.get_last_usage());
//!     Ok(())
//! }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::groupllm::client_wrapper::{
    ClientError, ClientWrapper, CompletionRequest, CompletionResponse, TokenUsage,
};
use crate::groupllm::clients::common::{excerpt, get_http_client, validate_base_url};
use crate::groupllm::config::GroupChatConfig;

/// Characters of an error body kept in [`ClientError::Status`].
const ERROR_BODY_EXCERPT: usize = 300;

/// Client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAICompatibleClient {
    api_key: String,
    /// Validated root, without trailing slash.
    base_url: String,
    model: String,
    timeout: Duration,
    proxy: Option<String>,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAICompatibleClient {
    /// Fails when `base_url` is not of the form `http(s)://host/.../v<N>`.
    pub fn new(api_key: &str, base_url: &str, model: &str) -> Result<Self, ClientError> {
        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: validate_base_url(base_url)?,
            model: model.to_string(),
            timeout: Duration::from_secs(30),
            proxy: None,
            token_usage: Mutex::new(None),
        })
    }

    /// Build a client from the session configuration.
    pub fn from_config(config: &GroupChatConfig) -> Result<Self, ClientError> {
        let client = Self::new(&config.api_key, &config.base_url, &config.model)?
            .with_timeout(config.timeout());
        Ok(match &config.proxy {
            Some(proxy) => client.with_proxy(proxy),
            None => client,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: &str) -> Self {
        let proxy = proxy.trim();
        self.proxy = if proxy.is_empty() {
            None
        } else {
            Some(proxy.to_string())
        };
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ClientWrapper for OpenAICompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ClientError> {
        let http = get_http_client(self.proxy.as_deref())?;

        let mut builder = http
            .post(self.completions_url())
            .timeout(self.timeout)
            .json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            log::error!(
                "groupllm::clients::openai_compatible: request to {} failed: {}",
                self.base_url,
                e
            );
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ClientError::Timeout
            } else {
                ClientError::Transport(e.to_string())
            }
        })?;

        if !status.is_success() {
            log::error!(
                "groupllm::clients::openai_compatible: API returned {} for model {}",
                status,
                request.model
            );
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: excerpt(&body, ERROR_BODY_EXCERPT),
            });
        }

        if !content_type.to_ascii_lowercase().contains("application/json") {
            return Err(ClientError::UnexpectedContentType(content_type));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::MalformedBody(e.to_string()))?;
        if parsed.choices.is_empty() {
            return Err(ClientError::EmptyChoices);
        }

        if let Some(usage) = parsed.token_usage() {
            *self.token_usage.lock().unwrap_or_else(|p| p.into_inner()) = Some(usage);
        }

        Ok(parsed)
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(matches!(
            OpenAICompatibleClient::new("", "https://api.openai.com", "gpt-3.5-turbo"),
            Err(ClientError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config = GroupChatConfig {
            base_url: "http://localhost:11434/v1/".into(),
            timeout_secs: 5,
            proxy: Some(" ".into()),
            ..GroupChatConfig::default()
        };
        let client = OpenAICompatibleClient::from_config(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");
        assert_eq!(client.completions_url(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(client.timeout(), Duration::from_secs(5));
        assert_eq!(client.model_name(), "gpt-3.5-turbo");
        assert!(client.proxy.is_none());
    }
}
