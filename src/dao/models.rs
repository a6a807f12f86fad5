use std::time::SystemTime;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use serde_with::{TimestampMilliSeconds, serde_as};

/// Sentinel stored in `lastAnsweredQuestion` before a team has been scored.
pub const NO_ANSWER_YET: i64 = -1;

/// A question within a level's question set.
///
/// Ordering is by level first, so a team's scoring marker keeps growing when
/// it moves on to a level whose questions start again at index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuestionKey {
    pub level: u32,
    pub index: usize,
}

impl QuestionKey {
    pub fn new(level: u32, index: usize) -> Self {
        Self { level, index }
    }

    fn marker(self) -> (u32, i64) {
        (self.level, i64::try_from(self.index).unwrap_or(i64::MAX))
    }
}

/// Partial set of fields sent to [`SharedStore::update`](crate::dao::store::SharedStore::update).
pub type Fields = Map<String, Value>;

/// Team document stored at `teams/{teamId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamRecord {
    /// Opaque passcode handed to the team out-of-band.
    #[serde(default)]
    pub passcode: String,
    /// Current score, unbounded below.
    #[serde(default)]
    pub score: i64,
    /// Set by the admin once the team advances.
    #[serde(default)]
    pub qualified: bool,
    /// Level the team is playing (starts at 1).
    #[serde(default = "default_level")]
    pub level: u32,
    /// Highest question index already scored, or [`NO_ANSWER_YET`].
    #[serde(default = "no_answer_yet")]
    pub last_answered_question: i64,
    /// Level `last_answered_question` belongs to.
    #[serde(default = "default_level")]
    pub last_answered_level: u32,
    /// Selection written through by the session while a question is open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    /// Question index `selected_option` belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_for_question: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_for_level: Option<u32>,
}

impl TeamRecord {
    /// Build a fresh record holding only a passcode.
    pub fn new(passcode: impl Into<String>) -> Self {
        Self {
            passcode: passcode.into(),
            score: 0,
            qualified: false,
            level: default_level(),
            last_answered_question: NO_ANSWER_YET,
            last_answered_level: default_level(),
            selected_option: None,
            selected_for_question: None,
            selected_for_level: None,
        }
    }

    /// Whether `key` has already been scored for this team.
    pub fn has_scored(&self, key: QuestionKey) -> bool {
        (self.last_answered_level, self.last_answered_question) >= key.marker()
    }

    /// Advance the scoring marker to `key`; never moves it backwards.
    pub fn mark_scored(&mut self, key: QuestionKey) {
        if !self.has_scored(key) {
            (self.last_answered_level, self.last_answered_question) = key.marker();
        }
    }

    /// Selection previously written through for `key`, if any.
    pub fn selection_for(&self, key: QuestionKey) -> Option<&str> {
        let level = self.selected_for_level.unwrap_or_else(default_level);
        match self.selected_for_question {
            Some(index) if QuestionKey::new(level, index) == key => self.selected_option.as_deref(),
            _ => None,
        }
    }
}

/// Singleton round document stored at `admin`, written only by the admin controller.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoundState {
    #[serde(default)]
    pub quiz_started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_question_index: Option<usize>,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub waiting_room_open: bool,
    /// Instant the current question opened (absolute-start timing).
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_start_time: Option<SystemTime>,
    /// Seconds left on the current question (pushed-countdown timing).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_left: Option<i64>,
}

impl Default for RoundState {
    fn default() -> Self {
        Self {
            quiz_started: false,
            current_question_index: None,
            level: default_level(),
            waiting_room_open: false,
            question_start_time: None,
            time_left: None,
        }
    }
}

impl RoundState {
    /// Published countdown clamped to zero.
    pub fn countdown(&self) -> Option<u32> {
        self.time_left
            .map(|left| u32::try_from(left.max(0)).unwrap_or(u32::MAX))
    }
}

/// Fields the scoring reconciler is allowed to touch on a team record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreFields {
    pub score: i64,
    pub last_answered_question: i64,
    pub last_answered_level: u32,
}

impl ScoreFields {
    pub fn new(score: i64, key: QuestionKey) -> Self {
        let (last_answered_level, last_answered_question) = key.marker();
        Self {
            score,
            last_answered_question,
            last_answered_level,
        }
    }
}

/// Fields a session writes when a selection is locked in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionFields {
    pub selected_option: String,
    pub selected_for_question: usize,
    pub selected_for_level: u32,
}

/// Fields the admin controller is allowed to touch on a team record.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAdminFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qualified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
}

/// Partial update of the round document.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz_started: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_question_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_room_open: Option<bool>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_start_time: Option<SystemTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<i64>,
}

/// Question as stored in the content files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    pub question: String,
    pub options: Vec<String>,
    pub answer: String,
}

/// Serialize a typed partial update into the field map expected by the store.
pub fn to_fields(partial: &impl Serialize) -> Result<Fields, serde_json::Error> {
    match serde_json::to_value(partial)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object of fields, got {other}"
        ))),
    }
}

/// Decode an optional stored value, treating absence as `None`.
pub fn decode<T: DeserializeOwned>(value: Option<Value>) -> Result<Option<T>, serde_json::Error> {
    value.map(serde_json::from_value).transpose()
}

fn default_level() -> u32 {
    1
}

fn no_answer_yet() -> i64 {
    NO_ANSWER_YET
}
