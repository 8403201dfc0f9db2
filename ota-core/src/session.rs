//! Update session state and the device-wide admission slot

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use serde::Serialize;

use crate::error::OtaError;
use crate::partition::PartitionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Validating,
    Writing,
    Finalizing,
    Committed,
    Aborted,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Aborted | SessionState::Failed)
    }

    /// Forward-only transitions; failure is reachable from any working state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Writing)
                | (Writing, Finalizing)
                | (Finalizing, Committed)
                | (Validating | Writing | Finalizing, Failed | Aborted)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Validating => "validating",
            SessionState::Writing => "writing",
            SessionState::Finalizing => "finalizing",
            SessionState::Committed => "committed",
            SessionState::Aborted => "aborted",
            SessionState::Failed => "failed",
        }
    }
}

/// Point-in-time view of the current or most recent session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub bytes_received: usize,
    pub bytes_expected: usize,
    pub progress: u8,
    pub partition: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Slot {
    active: bool,
    snapshot: SessionSnapshot,
}

/// Shared, lock-guarded admission slot: at most one [`UpdateSession`] exists
/// per slot at a time.
#[derive(Debug, Clone, Default)]
pub struct SessionSlot {
    inner: Arc<Mutex<Slot>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for a new session, or fail immediately with
    /// [`OtaError::Busy`]. Never queues.
    pub fn try_admit(&self, bytes_expected: usize) -> Result<UpdateSession, OtaError> {
        let mut slot = self.lock();
        if slot.active {
            warn!("Rejecting OTA request: a session is already active");
            return Err(OtaError::Busy);
        }
        slot.active = true;
        slot.snapshot = SessionSnapshot { bytes_expected, ..SessionSnapshot::default() };
        debug!("OTA session admitted ({} bytes expected)", bytes_expected);
        Ok(UpdateSession {
            slot: self.clone(),
            state: SessionState::Idle,
            bytes_expected,
            bytes_received: 0,
            target: None,
            last_error: None,
        })
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot.clone()
    }
}

/// One in-flight update. Dropping it frees the admission slot.
#[derive(Debug)]
pub struct UpdateSession {
    slot: SessionSlot,
    state: SessionState,
    bytes_expected: usize,
    bytes_received: usize,
    target: Option<PartitionDescriptor>,
    last_error: Option<String>,
}

impl UpdateSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn bytes_expected(&self) -> usize {
        self.bytes_expected
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    pub fn target(&self) -> Option<&PartitionDescriptor> {
        self.target.as_ref()
    }

    /// Bind the target partition; it stays fixed for the rest of the session.
    pub fn set_target(&mut self, target: PartitionDescriptor) {
        if self.target.is_none() {
            self.target = Some(target);
            self.publish();
        }
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), OtaError> {
        if !self.state.can_transition_to(next) {
            return Err(OtaError::InvalidTransition { from: self.state, to: next });
        }
        debug!("OTA session {} -> {}", self.state.as_str(), next.as_str());
        self.state = next;
        self.publish();
        Ok(())
    }

    /// Record the cumulative byte count. Never decreases and never exceeds
    /// the declared length.
    pub fn record_progress(&mut self, total: usize) -> Result<(), OtaError> {
        if total > self.bytes_expected {
            return Err(OtaError::Overrun { expected: self.bytes_expected });
        }
        self.bytes_received = self.bytes_received.max(total);
        self.publish();
        Ok(())
    }

    /// Move to the terminal state for `err`, when the current state allows it,
    /// and remember the reason for status queries.
    pub fn terminate(&mut self, err: &OtaError) {
        let next = err.terminal_state();
        if self.state.can_transition_to(next) {
            self.state = next;
        }
        self.last_error = Some(err.to_string());
        self.publish();
    }

    fn publish(&self) {
        let progress = if self.bytes_expected == 0 {
            0
        } else {
            (self.bytes_received * 100 / self.bytes_expected) as u8
        };
        let mut slot = self.slot.lock();
        slot.snapshot = SessionSnapshot {
            state: self.state,
            bytes_received: self.bytes_received,
            bytes_expected: self.bytes_expected,
            progress,
            partition: self.target.as_ref().map(|t| t.label.to_string()),
            last_error: self.last_error.clone(),
        };
    }
}

impl Drop for UpdateSession {
    fn drop(&mut self) {
        let mut slot = self.slot.lock();
        slot.active = false;
        debug!("OTA session released in state {}", self.state.as_str());
    }
}
