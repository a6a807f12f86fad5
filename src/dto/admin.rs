//! DTO definitions used by the admin REST API and documentation layer.

use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{dao::models::RoundState, dto::validation::validate_passcode};

/// Request to open or close the waiting room.
#[derive(Debug, Deserialize, ToSchema)]
pub struct WaitingRoomRequest {
    pub open: bool,
}

/// Request to start the quiz at a level.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct StartQuizRequest {
    #[validate(range(min = 1))]
    #[serde(default = "default_level")]
    pub level: u32,
}

/// Request to publish question `index`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishQuestionRequest {
    pub index: usize,
}

/// Request to register a team.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1))]
    pub team_id: String,
    #[validate(custom(function = "validate_passcode"))]
    pub passcode: String,
}

/// Admin-owned team fields; absent fields are left untouched.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct TeamStatusRequest {
    #[serde(default)]
    pub qualified: Option<bool>,
    #[serde(default)]
    #[validate(range(min = 1))]
    pub level: Option<u32>,
}

/// Generic action acknowledgement used by admin endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    pub message: String,
}

impl ActionResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Round document as exposed to the admin UI.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundView {
    pub quiz_started: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question_index: Option<usize>,
    pub level: u32,
    pub waiting_room_open: bool,
    /// Start of the current question in epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_start_time: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<i64>,
}

impl From<RoundState> for RoundView {
    fn from(round: RoundState) -> Self {
        Self {
            quiz_started: round.quiz_started,
            current_question_index: round.current_question_index,
            level: round.level,
            waiting_room_open: round.waiting_room_open,
            question_start_time: round
                .question_start_time
                .and_then(|start| start.duration_since(UNIX_EPOCH).ok())
                .map(|since| since.as_millis()),
            time_left: round.time_left,
        }
    }
}

fn default_level() -> u32 {
    1
}
