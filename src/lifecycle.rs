//! Boundary lifecycle states and the legal transition table.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryState {
    Idle,
    Pending,
    Streaming,
    Paused,
    Completed,
    Error,
    Aborted,
}

impl BoundaryState {
    /// Whether `self -> next` is in the transition table.
    pub fn can_transition_to(self, next: BoundaryState) -> bool {
        use BoundaryState::*;
        matches!(
            (self, next),
            (Idle, Pending)
                | (Pending, Streaming)
                | (Pending, Aborted)
                | (Streaming, Paused)
                | (Streaming, Completed)
                | (Streaming, Error)
                | (Streaming, Aborted)
                | (Paused, Streaming)
                | (Paused, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BoundaryState::Completed | BoundaryState::Error | BoundaryState::Aborted
        )
    }

    /// Streaming or Paused: the boundary may still receive chunks.
    pub fn is_active(self) -> bool {
        matches!(self, BoundaryState::Streaming | BoundaryState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BoundaryState::Idle => "idle",
            BoundaryState::Pending => "pending",
            BoundaryState::Streaming => "streaming",
            BoundaryState::Paused => "paused",
            BoundaryState::Completed => "completed",
            BoundaryState::Error => "error",
            BoundaryState::Aborted => "aborted",
        }
    }

    pub const ALL: [BoundaryState; 7] = [
        BoundaryState::Idle,
        BoundaryState::Pending,
        BoundaryState::Streaming,
        BoundaryState::Paused,
        BoundaryState::Completed,
        BoundaryState::Error,
        BoundaryState::Aborted,
    ];
}

impl fmt::Display for BoundaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
