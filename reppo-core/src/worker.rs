//! Worker status state machine

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// Process spawned, handshake not yet complete
    Starting,
    /// Handshake complete, accepting calls
    Ready,
    /// A call failed; discoverable but rejecting calls
    Degraded,
    /// Process gone or stopped; terminal
    Terminated,
}

impl WorkerStatus {
    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting, Terminated)
                | (Ready, Degraded)
                | (Ready, Terminated)
                | (Degraded, Ready)
                | (Degraded, Terminated)
        )
    }

    /// Validate a transition, returning the new status
    pub fn transition_to(self, next: WorkerStatus) -> Result<WorkerStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::state_transition(format!(
                "Cannot transition worker from {} to {}",
                self, next
            )))
        }
    }

    /// Whether the worker should appear in discovery output
    pub fn is_discoverable(self) -> bool {
        matches!(self, WorkerStatus::Ready | WorkerStatus::Degraded)
    }

    pub fn is_terminal(self) -> bool {
        self == WorkerStatus::Terminated
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "Starting"),
            WorkerStatus::Ready => write!(f, "Ready"),
            WorkerStatus::Degraded => write!(f, "Degraded"),
            WorkerStatus::Terminated => write!(f, "Terminated"),
        }
    }
}
