//! DTOs exchanged with participant clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{
        phase::VisibleSessionPhase,
        validation::{validate_option, validate_passcode},
    },
    state::screen::Screen,
};

/// Join request built from the team link and the typed passcode.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Team id carried by the join link; absent when the link is broken.
    #[serde(default)]
    pub team: Option<String>,
    #[validate(custom(function = "validate_passcode"))]
    pub passcode: String,
}

/// Option picked for the active question.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SelectRequest {
    #[validate(custom(function = "validate_option"))]
    pub option: String,
}

/// Whether the session is in step with the store.
#[derive(Debug, Serialize, ToSchema, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    /// Reads or writes failed; a retry is possible.
    Error,
}

/// Active question as seen by one team.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub index: usize,
    pub text: String,
    /// Options in this session's display order.
    pub options: Vec<String>,
    /// Seconds left; absent until timing data arrived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    pub revealed: bool,
    /// Correct option, only once revealed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Everything a client needs to render its screen.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct SessionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    pub phase: VisibleSessionPhase,
    pub screen: Screen,
    pub sync: SyncStatus,
    /// Human-readable reason for a sync error or missing content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub score: i64,
    pub qualified: bool,
    pub level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<QuestionView>,
    /// A reveal happened but its score is not stored yet.
    pub score_pending: bool,
}

impl SessionView {
    /// View shown before authentication.
    pub fn unauthenticated() -> Self {
        Self {
            team_id: None,
            phase: VisibleSessionPhase::Unauthenticated,
            screen: Screen::Passcode,
            sync: SyncStatus::Synced,
            message: None,
            score: 0,
            qualified: false,
            level: 1,
            question: None,
            score_pending: false,
        }
    }
}
