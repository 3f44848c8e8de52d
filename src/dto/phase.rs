use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::SessionStatus;

/// Session status exposed to clients (REST/WebSocket).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleStatus {
    /// Lobby open, game not started.
    Waiting,
    /// Game running.
    Active,
    /// Game over.
    Ended,
}

impl From<SessionStatus> for VisibleStatus {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Waiting => VisibleStatus::Waiting,
            SessionStatus::Active => VisibleStatus::Active,
            SessionStatus::Ended => VisibleStatus::Ended,
        }
    }
}
