// Shared helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use groupllm::agent::AgentDefinition;
use groupllm::client_wrapper::{
    ClientError, ClientWrapper, CompletionRequest, CompletionResponse, TokenUsage,
};
use groupllm::event::{EventHandler, SessionEvent};
use groupllm::registry::AgentRegistry;
use groupllm::store::MemoryStore;
use groupllm::{GroupChat, GroupChatConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Script = dyn Fn(&str, &CompletionRequest) -> Result<String, ClientError> + Send + Sync;

/// Mock completion boundary. The calling agent is read from the
/// introduction message ("Your name is X.") at the top of every request.
pub struct ScriptedClient {
    script: Box<Script>,
    calls: Mutex<Vec<(String, CompletionRequest)>>,
    usage: Mutex<Option<TokenUsage>>,
    delay: Duration,
}

impl ScriptedClient {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&str, &CompletionRequest) -> Result<String, ClientError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    /// Wait `delay` before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every agent answers "<name> here".
    pub fn introducing() -> Self {
        Self::new(|agent, _| Ok(format!("{} here", agent)))
    }

    pub fn calls(&self) -> Vec<(String, CompletionRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn callers(&self) -> Vec<String> {
        self.calls().into_iter().map(|(agent, _)| agent).collect()
    }

    /// Requests sent on behalf of `agent`.
    pub fn requests_for(&self, agent: &str) -> Vec<CompletionRequest> {
        self.calls()
            .into_iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, r)| r)
            .collect()
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.requests_for(agent).len()
    }
}

pub fn agent_of(request: &CompletionRequest) -> String {
    request
        .messages
        .first()
        .and_then(|m| m.content.strip_prefix("Your name is "))
        .and_then(|rest| rest.split('.').next())
        .unwrap_or("")
        .to_string()
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ClientError> {
        let agent = agent_of(request);
        self.calls
            .lock()
            .unwrap()
            .push((agent.clone(), request.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let content = (self.script)(&agent, request)?;
        *self.usage.lock().unwrap() = Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        });
        Ok(CompletionResponse::from_content("scripted", content))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

/// Collects every session event.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn autonomous_rounds_started(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SessionEvent::RoundStarted { autonomous: true, .. }))
            .count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_session_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Config with human "Alice" and no pacing delay.
pub fn test_config() -> GroupChatConfig {
    GroupChatConfig {
        user_name: "Alice".into(),
        inter_call_delay_ms: 0,
        ..GroupChatConfig::default()
    }
}

pub struct Harness {
    pub chat: GroupChat,
    pub client: Arc<ScriptedClient>,
    pub events: Arc<RecordingHandler>,
    pub store: Arc<MemoryStore>,
}

pub fn start_chat(
    agents: Vec<AgentDefinition>,
    client: ScriptedClient,
    config: GroupChatConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new().with_agents(agents));
    let registry = Arc::new(AgentRegistry::load(store.clone(), &config.user_name).unwrap());
    let client = Arc::new(client);
    let events = Arc::new(RecordingHandler::default());
    let chat = GroupChat::builder(config, registry, client.clone())
        .with_event_handler(events.clone())
        .start()
        .unwrap();
    Harness {
        chat,
        client,
        events,
        store,
    }
}
