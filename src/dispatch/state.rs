//! Per-message delivery state machine and run accounting.

use std::time::{Duration, Instant};

use serde::Serialize;

/// State of one message's callback delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Selected for delivery; no attempt made yet.
    Selected,
    /// An attempt is in flight.
    Sending,
    /// Every request of one attempt was accepted.
    Succeeded,
    /// No attempt succeeded and no further attempt will be made.
    Exhausted,
}

impl DeliveryState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        use DeliveryState::*;

        matches!(
            (self, target),
            (Selected, Sending) | (Selected, Exhausted) |
            // Sending -> Sending is a retry
            (Sending, Sending) | (Sending, Succeeded) | (Sending, Exhausted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Selected => "selected",
            Self::Sending => "sending",
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
        };
        write!(f, "{s}")
    }
}

/// Tracks one message through its delivery attempts.
#[derive(Debug, Clone)]
pub struct Delivery {
    message_id: String,
    state: DeliveryState,
    attempts: u32,
    started_at: Instant,
}

impl Delivery {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            state: DeliveryState::Selected,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Transition to a new state.
    pub fn transition_to(&mut self, new_state: DeliveryState) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition delivery of {} from {} to {}",
                self.message_id, self.state, new_state
            ));
        }
        tracing::trace!(
            message_id = %self.message_id,
            from = %self.state,
            to = %new_state,
            "Delivery state transition"
        );
        if new_state == DeliveryState::Sending {
            self.attempts += 1;
        }
        self.state = new_state;
        Ok(())
    }
}

/// Final result of delivering one selected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The callback was accepted. `marked` is false when the processed
    /// action failed afterwards; the message then shows up again next run.
    Delivered { attempts: u32, marked: bool },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
    /// Shutdown interrupted delivery.
    Cancelled { attempts: u32 },
    /// The request could not be built; retrying would not help.
    Rejected { reason: String },
}

/// Counters for one poll-and-dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Unread messages fetched.
    pub fetched: usize,
    /// Messages every selector applied to.
    pub selected: usize,
    pub delivered: usize,
    pub exhausted: usize,
    pub cancelled: usize,
    pub rejected: usize,
    /// Delivered messages whose processed action failed.
    pub mark_failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Delivered { marked, .. } => {
                self.delivered += 1;
                if !marked {
                    self.mark_failed += 1;
                }
            }
            MessageOutcome::Exhausted { .. } => self.exhausted += 1,
            MessageOutcome::Cancelled { .. } => self.cancelled += 1,
            MessageOutcome::Rejected { .. } => self.rejected += 1,
        }
    }

    /// Selected messages that were not delivered.
    pub fn failed(&self) -> usize {
        self.exhausted + self.cancelled + self.rejected
    }
}
