//! Preview field lifecycle: Idle → Pending → Requesting → Resolved/Failed.
//! Edits return any state to Pending; clearing returns any state to Idle.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    /// Nothing to preview.
    Idle,
    /// Debounce timer running.
    Pending,
    Requesting,
    Resolved,
    Failed,
}

impl std::fmt::Display for FieldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldState::Idle => write!(f, "Idle"),
            FieldState::Pending => write!(f, "Pending"),
            FieldState::Requesting => write!(f, "Requesting"),
            FieldState::Resolved => write!(f, "Resolved"),
            FieldState::Failed => write!(f, "Failed"),
        }
    }
}

impl FieldState {
    pub fn can_transition_to(self, next: FieldState) -> bool {
        matches!(
            (self, next),
            (_, FieldState::Pending)
                | (_, FieldState::Idle)
                | (FieldState::Pending, FieldState::Requesting)
                | (FieldState::Requesting, FieldState::Resolved)
                | (FieldState::Requesting, FieldState::Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: FieldState,
    pub to: FieldState,
}

/// Thread-safe state holder with a watch channel for subscribers.
pub struct StateMachine {
    state: RwLock<FieldState>,
    state_tx: watch::Sender<FieldState>,
}

impl StateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(FieldState::Idle);
        Self {
            state: RwLock::new(FieldState::Idle),
            state_tx,
        }
    }

    pub fn current(&self) -> FieldState {
        *self.state.read()
    }

    pub fn transition(&self, next: FieldState) -> Result<FieldState, InvalidTransition> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            let err = InvalidTransition { from: current, to: next };
            warn!(from = %current, to = %next, "rejected field transition");
            return Err(err);
        }
        *state = next;
        self.state_tx.send_replace(next);
        debug!(from = %current, to = %next, "field transition");
        Ok(next)
    }

    pub fn subscribe(&self) -> watch::Receiver<FieldState> {
        self.state_tx.subscribe()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
