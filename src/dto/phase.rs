use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::{SessionPhase, VerifiedPhase};

/// Session phase exposed to clients (REST/SSE).
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSessionPhase {
    /// Waiting for a passcode.
    Unauthenticated,
    /// Passcode being checked.
    Authenticating,
    /// Verified, nothing to answer.
    Waiting,
    /// A question is open.
    Answering,
    /// The answer of the active question is shown.
    Revealed,
    /// Team qualified for the next stage.
    Qualified,
    /// No questions left.
    Ended,
}

impl From<SessionPhase> for VisibleSessionPhase {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Unauthenticated => VisibleSessionPhase::Unauthenticated,
            SessionPhase::Authenticating => VisibleSessionPhase::Authenticating,
            SessionPhase::Verified(VerifiedPhase::Waiting) => VisibleSessionPhase::Waiting,
            SessionPhase::Verified(VerifiedPhase::Answering) => VisibleSessionPhase::Answering,
            SessionPhase::Verified(VerifiedPhase::Revealed) => VisibleSessionPhase::Revealed,
            SessionPhase::Verified(VerifiedPhase::Qualified) => VisibleSessionPhase::Qualified,
            SessionPhase::Verified(VerifiedPhase::Ended) => VisibleSessionPhase::Ended,
        }
    }
}
