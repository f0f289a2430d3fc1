//! The orchestration queue: the single consumer that owns history.
//!
//! Every message, whether typed by the human, produced by an agent or
//! authored by the engine, arrives as a [`QueueItem::Commit`] and is appended
//! in arrival order by one task. That task also decides whether the commit
//! triggers a dispatch round, and learns about finished rounds through
//! [`QueueItem::RoundFinished`]. It never awaits a round itself, so a slow
//! completion call can never stall ingestion.
//!
//! Scheduling rules:
//!
//! - a human message resets the turn count, drops the pending autonomous
//!   trigger and starts a round immediately,
//! - an agent message starts an autonomous round when none is running,
//!   otherwise it becomes the pending trigger, replacing any older one, and
//!   is started once no round is running,
//! - a round that hit the turn limit drops the pending trigger,
//! - after a clear, replies from rounds that began earlier are discarded.
//!
//! At most one trigger ever waits, so a chatty round cannot build a backlog
//! that outgrows the rounds draining it.

use crate::groupllm::context::persona_seed;
use crate::groupllm::dispatcher::{MessageSink, ResponseDispatcher, RoundContext, RoundOutcome, RoundReport};
use crate::groupllm::event::{EventHandler, SessionEvent};
use crate::groupllm::message::{Message, Role};
use crate::groupllm::registry::AgentRegistry;
use crate::groupllm::turn::TurnController;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

/// A message as published on the notification stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedMessage {
    /// Position in history since the session started, from 1. Not reset by
    /// a clear.
    pub seq: u64,
    pub committed_at: DateTime<Utc>,
    pub message: Message,
}

pub(crate) enum QueueItem {
    /// Append a message. `epoch` is set for output of a dispatch round and
    /// is compared against the current epoch to drop pre-clear replies.
    Commit {
        message: Message,
        epoch: Option<u64>,
    },
    RoundFinished {
        round_id: String,
        epoch: u64,
        outcome: Result<RoundReport, String>,
    },
    Clear {
        done: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Sending side of the queue, shared by the session and by running rounds.
#[derive(Clone)]
pub(crate) struct QueueHandle {
    tx: mpsc::UnboundedSender<QueueItem>,
    /// Queued items + rounds in flight + the pending trigger.
    outstanding: Arc<watch::Sender<usize>>,
}

impl QueueHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<QueueItem>,
        outstanding: Arc<watch::Sender<usize>>,
    ) -> Self {
        Self { tx, outstanding }
    }

    /// Returns `false` if the consumer has stopped.
    pub(crate) fn push(&self, item: QueueItem) -> bool {
        self.outstanding.send_modify(|n| *n += 1);
        if self.tx.send(item).is_err() {
            self.release(1);
            return false;
        }
        true
    }

    pub(crate) fn watch_outstanding(&self) -> watch::Receiver<usize> {
        self.outstanding.subscribe()
    }

    fn hold(&self, n: usize) {
        self.outstanding.send_modify(|c| *c += n);
    }

    fn release(&self, n: usize) {
        self.outstanding.send_modify(|c| *c = c.saturating_sub(n));
    }
}

/// Round output, tagged with the epoch the round started in.
struct RoundSink {
    queue: QueueHandle,
    epoch: u64,
}

impl MessageSink for RoundSink {
    fn commit(&self, message: Message) {
        if !self.queue.push(QueueItem::Commit {
            message,
            epoch: Some(self.epoch),
        }) {
            log::warn!("groupllm::queue: dropping round output, session has shut down");
        }
    }
}

/// State readable from outside the consumer.
pub(crate) struct SessionState {
    pub(crate) history: RwLock<Vec<Message>>,
    pub(crate) turns: Arc<Mutex<TurnController>>,
    pub(crate) allow_agent_conversations: AtomicBool,
    pub(crate) dev_mode: AtomicBool,
    pub(crate) notifications: broadcast::Sender<CommittedMessage>,
}

impl SessionState {
    pub(crate) fn history(&self) -> Vec<Message> {
        self.history.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub(crate) fn turns(&self) -> std::sync::MutexGuard<'_, TurnController> {
        self.turns.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub(crate) struct Consumer {
    pub(crate) state: Arc<SessionState>,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) dispatcher: Arc<ResponseDispatcher>,
    pub(crate) event_handler: Option<Arc<dyn EventHandler>>,
    pub(crate) queue: QueueHandle,
    pub(crate) rx: mpsc::UnboundedReceiver<QueueItem>,
    epoch: u64,
    next_seq: u64,
    rounds_in_flight: usize,
    pending: Option<Message>,
}

impl Consumer {
    pub(crate) fn new(
        state: Arc<SessionState>,
        registry: Arc<AgentRegistry>,
        dispatcher: Arc<ResponseDispatcher>,
        event_handler: Option<Arc<dyn EventHandler>>,
        queue: QueueHandle,
        rx: mpsc::UnboundedReceiver<QueueItem>,
    ) -> Self {
        Self {
            state,
            registry,
            dispatcher,
            event_handler,
            queue,
            rx,
            epoch: 0,
            next_seq: 1,
            rounds_in_flight: 0,
            pending: None,
        }
    }

    pub(crate) async fn run(mut self) {
        log::info!("groupllm::queue: consumer started");
        while let Some(item) = self.rx.recv().await {
            let stop = matches!(item, QueueItem::Shutdown);
            match item {
                QueueItem::Commit { message, epoch } => self.commit(message, epoch),
                QueueItem::RoundFinished {
                    round_id,
                    epoch,
                    outcome,
                } => self.round_finished(round_id, epoch, outcome),
                QueueItem::Clear { done } => {
                    self.clear().await;
                    let _ = done.send(());
                }
                QueueItem::Shutdown => {}
            }
            self.queue.release(1);
            if stop {
                break;
            }
        }
        self.queue.outstanding.send_replace(0);
        log::info!("groupllm::queue: consumer stopped");
    }

    fn commit(&mut self, message: Message, epoch: Option<u64>) {
        if let Some(e) = epoch {
            if e != self.epoch {
                log::debug!(
                    "groupllm::queue: discarding message from {} produced before a clear",
                    message.sender_name()
                );
                return;
            }
        }

        self.state
            .history
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(message.clone());
        let committed = CommittedMessage {
            seq: self.next_seq,
            committed_at: Utc::now(),
            message: message.clone(),
        };
        self.next_seq += 1;
        log::debug!(
            "groupllm::queue: committed #{} from {}",
            committed.seq,
            message.sender_name()
        );
        let _ = self.state.notifications.send(committed);

        match message.role() {
            Role::Human => {
                self.state.turns().on_human_message();
                self.drop_pending();
                self.start_round(message, false);
            }
            Role::Agent => {
                if !self.state.allow_agent_conversations.load(Ordering::SeqCst) {
                    return;
                }
                if self.rounds_in_flight > 0 {
                    match self.pending.replace(message) {
                        Some(superseded) => log::debug!(
                            "groupllm::queue: pending trigger from {} superseded",
                            superseded.sender_name()
                        ),
                        None => self.queue.hold(1),
                    }
                } else {
                    self.start_round(message, true);
                }
            }
            Role::System => {}
        }
    }

    fn round_finished(&mut self, round_id: String, epoch: u64, outcome: Result<RoundReport, String>) {
        self.rounds_in_flight = self.rounds_in_flight.saturating_sub(1);
        self.queue.release(1);

        match outcome {
            Ok(report) => {
                if report.outcome == RoundOutcome::LimitReached && epoch == self.epoch {
                    self.drop_pending();
                }
            }
            Err(e) => {
                log::error!("groupllm::queue: round {} aborted: {}", round_id, e);
                if epoch == self.epoch {
                    self.commit(Message::system(format!("A response round failed: {}", e)), None);
                }
            }
        }

        if self.rounds_in_flight == 0 {
            if let Some(next) = self.pending.take() {
                self.queue.release(1);
                self.start_round(next, true);
            }
        }
    }

    async fn clear(&mut self) {
        self.epoch += 1;
        self.drop_pending();
        let seed = persona_seed(&self.registry.snapshot());
        *self.state.history.write().unwrap_or_else(|p| p.into_inner()) = seed;
        self.state.turns().reset();
        log::info!("groupllm::queue: history cleared");
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&SessionEvent::HistoryCleared).await;
        }
    }

    fn drop_pending(&mut self) {
        if self.pending.take().is_some() {
            self.queue.release(1);
        }
    }

    fn start_round(&mut self, trigger: Message, autonomous: bool) {
        let ctx = RoundContext {
            round_id: Uuid::new_v4().to_string(),
            trigger,
            history: Arc::new(self.state.history()),
            roster: self.registry.snapshot(),
            autonomous,
            dev_mode: self.state.dev_mode.load(Ordering::SeqCst),
        };
        let round_id = ctx.round_id.clone();
        let epoch = self.epoch;
        let sink = RoundSink {
            queue: self.queue.clone(),
            epoch,
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let queue = self.queue.clone();

        self.rounds_in_flight += 1;
        self.queue.hold(1);

        tokio::spawn(async move {
            let round = tokio::spawn(async move { dispatcher.dispatch(ctx, &sink).await });
            let outcome = round.await.map_err(|e| e.to_string());
            queue.push(QueueItem::RoundFinished {
                round_id,
                epoch,
                outcome,
            });
        });
    }
}
