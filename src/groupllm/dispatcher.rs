//! One dispatch round: pick the responders for a triggering message and
//! call them one after another.
//!
//! Every responder in a round sees the same history snapshot, taken when
//! the round began, so they all react to the trigger and not to each
//! other's fresh replies. Replies are not written to history here; they go
//! to a [`MessageSink`] (in a running session, the orchestration queue) and
//! are committed from there.
//!
//! A responder that fails, whether by a boundary error or a panic, produces
//! one system message naming it, and the round moves on to the next
//! responder.

use crate::groupllm::agent::AgentDefinition;
use crate::groupllm::client_wrapper::{
    ChatMessage, ClientError, ClientWrapper, CompletionRequest, TokenUsage,
};
use crate::groupllm::config::SamplingParameters;
use crate::groupllm::context::build_view;
use crate::groupllm::event::{EventHandler, SessionEvent};
use crate::groupllm::mention;
use crate::groupllm::message::{Message, MessageError, Role};
use crate::groupllm::registry::Roster;
use crate::groupllm::turn::{AutoRoundDecision, TurnController};
use futures_util::FutureExt;
use std::any::Any;
use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ResponderError = Box<dyn Error + Send + Sync>;

/// Where a round's output goes.
pub trait MessageSink: Send + Sync {
    fn commit(&self, message: Message);
}

/// Collects messages in memory.
impl MessageSink for Mutex<Vec<Message>> {
    fn commit(&self, message: Message) {
        self.lock().unwrap_or_else(|p| p.into_inner()).push(message);
    }
}

/// Everything a round reads, fixed when the round begins.
#[derive(Debug, Clone)]
pub struct RoundContext {
    pub round_id: String,
    pub trigger: Message,
    /// History as it stood when the round began, trigger included.
    pub history: Arc<Vec<Message>>,
    pub roster: Arc<Roster>,
    pub autonomous: bool,
    /// Publish each context view as a [`SessionEvent::ContextBuilt`].
    pub dev_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Completed,
    /// The turn budget ran out; a notice was committed.
    LimitReached,
    /// Skipped silently because the limit was already announced.
    Halted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub round_id: String,
    pub autonomous: bool,
    pub outcome: RoundOutcome,
    pub responders: Vec<String>,
    pub responded: usize,
    pub failed: usize,
}

/// Agents that must or may answer `trigger`, in registry order.
///
/// The sender never answers itself. An addressed message is answered by its
/// addressee alone, whatever the policies say. A public message is answered
/// by agents that respond to public messages and, in an autonomous round
/// triggered by an agent, also by agents that respond to other agents.
pub fn eligible_responders(
    trigger: &Message,
    roster: &Roster,
    autonomous: bool,
) -> Vec<AgentDefinition> {
    let agent_authored = autonomous && trigger.role() == Role::Agent;
    roster
        .active_agents()
        .into_iter()
        .filter(|a| a.name != trigger.sender_name())
        .filter(|a| match trigger.target() {
            Some(target) => a.name == target,
            None => a.auto_respond_to_public || (agent_authored && a.auto_respond_to_agents),
        })
        .cloned()
        .collect()
}

/// Turn raw completion text into `agent_name`'s message: drop an echoed
/// `Name:` prefix and parse a leading mention of another active agent.
pub fn reply_message(agent_name: &str, raw: &str, roster: &Roster) -> Result<Message, MessageError> {
    let prefix = format!("{}:", agent_name);
    let text = raw.trim_start();
    let text = text.strip_prefix(prefix.as_str()).unwrap_or(text);

    let others: Vec<String> = roster
        .active_names()
        .into_iter()
        .filter(|n| n != agent_name)
        .collect();
    let parsed = mention::parse(text, &others);
    Message::agent(parsed.content, agent_name, parsed.target)
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

pub struct ResponseDispatcher {
    client: Arc<dyn ClientWrapper>,
    turns: Arc<Mutex<TurnController>>,
    sampling: SamplingParameters,
    inter_call_delay: Duration,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ResponseDispatcher {
    pub fn new(client: Arc<dyn ClientWrapper>, turns: Arc<Mutex<TurnController>>) -> Self {
        Self {
            client,
            turns,
            sampling: SamplingParameters::default(),
            inter_call_delay: Duration::from_millis(1000),
            event_handler: None,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParameters) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_inter_call_delay(mut self, delay: Duration) -> Self {
        self.inter_call_delay = delay;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&event).await;
        }
    }

    fn turns(&self) -> std::sync::MutexGuard<'_, TurnController> {
        self.turns.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Completion request for `agent` over `view`.
    pub fn build_request(&self, agent: &AgentDefinition, view: &[Message]) -> CompletionRequest {
        let model = agent
            .model
            .clone()
            .unwrap_or_else(|| self.client.model_name().to_string());
        let s = &self.sampling;
        CompletionRequest {
            model,
            messages: view.iter().map(ChatMessage::from).collect(),
            temperature: s.temperature,
            top_p: s.top_p,
            max_tokens: s.max_tokens,
            presence_penalty: s.presence_penalty,
            frequency_penalty: s.frequency_penalty,
            stop: s.stop.clone(),
        }
    }

    async fn respond(
        &self,
        agent: &AgentDefinition,
        view: &[Message],
        roster: &Roster,
    ) -> Result<(Message, Option<TokenUsage>), ResponderError> {
        let request = self.build_request(agent, view);
        let response = self.client.chat_completion(&request).await?;
        let raw = response.first_content().ok_or(ClientError::EmptyChoices)?;
        let message = reply_message(&agent.name, raw, roster)?;
        Ok((message, response.token_usage()))
    }

    /// Run one round for `ctx.trigger`, committing replies and failure
    /// notices to `sink`.
    pub async fn dispatch(&self, ctx: RoundContext, sink: &dyn MessageSink) -> RoundReport {
        let mut report = RoundReport {
            round_id: ctx.round_id.clone(),
            autonomous: ctx.autonomous,
            outcome: RoundOutcome::Completed,
            responders: Vec::new(),
            responded: 0,
            failed: 0,
        };

        let mut generation = None;
        if ctx.autonomous {
            let decision = {
                let mut turns = self.turns();
                generation = Some(turns.generation());
                turns.begin_autonomous()
            };
            match decision {
                AutoRoundDecision::Proceed => {}
                AutoRoundDecision::LimitReached { max_turns } => {
                    log::warn!(
                        "groupllm::dispatcher: autonomous turn limit ({}) reached, halting",
                        max_turns
                    );
                    sink.commit(Message::system(format!(
                        "Maximum autonomous turns ({}) reached. The conversation has stopped.",
                        max_turns
                    )));
                    self.emit(SessionEvent::TurnLimitReached { max_turns }).await;
                    report.outcome = RoundOutcome::LimitReached;
                    return report;
                }
                AutoRoundDecision::Halted => {
                    log::debug!(
                        "groupllm::dispatcher: skipping round {} while halted",
                        ctx.round_id
                    );
                    report.outcome = RoundOutcome::Halted;
                    return report;
                }
            }
        }

        let responders = eligible_responders(&ctx.trigger, &ctx.roster, ctx.autonomous);
        report.responders = responders.iter().map(|a| a.name.clone()).collect();
        log::info!(
            "groupllm::dispatcher: round {} for message from {} ({}), responders: {:?}",
            ctx.round_id,
            ctx.trigger.sender_name(),
            if ctx.autonomous { "autonomous" } else { "human" },
            report.responders
        );
        self.emit(SessionEvent::RoundStarted {
            round_id: ctx.round_id.clone(),
            trigger_sender: ctx.trigger.sender_name().to_string(),
            autonomous: ctx.autonomous,
            responders: report.responders.clone(),
        })
        .await;

        for (i, agent) in responders.iter().enumerate() {
            if i > 0 && !self.inter_call_delay.is_zero() {
                tokio::time::sleep(self.inter_call_delay).await;
            }

            self.emit(SessionEvent::AgentSelected {
                round_id: ctx.round_id.clone(),
                agent: agent.name.clone(),
            })
            .await;

            let view = build_view(&ctx.history, agent, &ctx.roster);
            if ctx.dev_mode {
                self.emit(SessionEvent::ContextBuilt {
                    round_id: ctx.round_id.clone(),
                    agent: agent.name.clone(),
                    view: view.clone(),
                })
                .await;
            }

            log::info!("groupllm::dispatcher: calling {}", agent.name);
            let outcome = AssertUnwindSafe(self.respond(agent, &view, &ctx.roster))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(panic_text(payload).into()));

            match outcome {
                Ok((message, tokens_used)) => {
                    let target = message.target().map(str::to_string);
                    sink.commit(message);
                    report.responded += 1;
                    self.emit(SessionEvent::AgentResponded {
                        round_id: ctx.round_id.clone(),
                        agent: agent.name.clone(),
                        target,
                        tokens_used,
                    })
                    .await;
                }
                Err(e) => {
                    log::error!("groupllm::dispatcher: {} failed to respond: {}", agent.name, e);
                    let error = e.to_string();
                    sink.commit(Message::system(format!(
                        "{} failed to respond: {}",
                        agent.name, error
                    )));
                    report.failed += 1;
                    self.emit(SessionEvent::AgentFailed {
                        round_id: ctx.round_id.clone(),
                        agent: agent.name.clone(),
                        error,
                    })
                    .await;
                }
            }
        }

        if let Some(generation) = generation {
            self.turns().record_auto_round(generation);
        }

        self.emit(SessionEvent::RoundFinished {
            round_id: ctx.round_id.clone(),
            autonomous: ctx.autonomous,
            responded: report.responded,
            failed: report.failed,
        })
        .await;
        report
    }
}
