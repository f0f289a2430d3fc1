//! Bounding the agent-to-agent feedback loop.
//!
//! Every round triggered by an agent message is a *turn*. The
//! [`TurnController`] allows `max_turns` of them between two human messages
//! (unlimited while the loop is enabled). When the budget runs out the
//! controller halts: the first refused round reports
//! [`AutoRoundDecision::LimitReached`], every later one is refused silently
//! with [`AutoRoundDecision::Halted`], until a human message, enabling the
//! loop or raising the limit lets rounds run again.
//!
//! A human message or a clear starts a new *generation*. A round that began
//! in an earlier generation is not counted when it finishes, so a fresh
//! budget is never charged for rounds that started before it.

use crate::groupllm::config::ConfigError;

/// Snapshot for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStatus {
    pub turn_count: usize,
    pub max_turns: usize,
    pub loop_enabled: bool,
}

/// Outcome of [`TurnController::begin_autonomous`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRoundDecision {
    /// The round may run.
    Proceed,
    /// The budget just ran out; announce it once and skip the round.
    LimitReached { max_turns: usize },
    /// Already announced; skip silently.
    Halted,
}

#[derive(Debug, Clone)]
pub struct TurnController {
    turn_count: usize,
    max_turns: usize,
    loop_enabled: bool,
    halted: bool,
    generation: u64,
}

impl TurnController {
    pub fn new(max_turns: usize) -> Result<Self, ConfigError> {
        if max_turns < 1 {
            return Err(ConfigError::InvalidTurnLimit(max_turns));
        }
        Ok(Self {
            turn_count: 0,
            max_turns,
            loop_enabled: false,
            halted: false,
            generation: 0,
        })
    }

    pub fn on_human_message(&mut self) {
        self.turn_count = 0;
        self.halted = false;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Budget generation; bumped by every human message and every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn may_auto_respond(&self) -> bool {
        self.loop_enabled || self.turn_count < self.max_turns
    }

    /// Count one finished autonomous round that started in `generation`.
    /// Rounds from an earlier generation are ignored.
    pub fn record_auto_round(&mut self, generation: u64) {
        if generation != self.generation {
            log::debug!(
                "groupllm::turn: not counting a round from generation {} (now {})",
                generation,
                self.generation
            );
            return;
        }
        self.turn_count = self.turn_count.saturating_add(1);
    }

    /// Decide whether an autonomous round may start now.
    pub fn begin_autonomous(&mut self) -> AutoRoundDecision {
        if self.may_auto_respond() {
            self.halted = false;
            AutoRoundDecision::Proceed
        } else if self.halted {
            AutoRoundDecision::Halted
        } else {
            self.halted = true;
            AutoRoundDecision::LimitReached {
                max_turns: self.max_turns,
            }
        }
    }

    /// Rejects values below 1. A lower limit clamps the current count so
    /// it never exceeds the limit.
    pub fn set_max_turns(&mut self, max_turns: usize) -> Result<(), ConfigError> {
        if max_turns < 1 {
            return Err(ConfigError::InvalidTurnLimit(max_turns));
        }
        self.max_turns = max_turns;
        if self.turn_count > max_turns {
            self.turn_count = max_turns;
        }
        if self.turn_count < max_turns {
            self.halted = false;
        }
        Ok(())
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
        if enabled {
            self.halted = false;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Back to zero turns, as after clearing the conversation.
    pub fn reset(&mut self) {
        self.turn_count = 0;
        self.halted = false;
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn status(&self) -> TurnStatus {
        TurnStatus {
            turn_count: self.turn_count,
            max_turns: self.max_turns,
            loop_enabled: self.loop_enabled,
        }
    }
}
