//! Idempotent scoring: each (team, question) pair moves the score at most once.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    dao::{
        models::{QuestionKey, ScoreFields, TeamRecord, decode, to_fields},
        storage::StorageError,
        store::{SharedStore, StorePath},
    },
    error::{AuthError, SessionError},
};

/// Result of comparing a selection with the correct answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Correct,
    /// A wrong answer and no answer share the same penalty.
    WrongOrSkipped,
}

/// Points awarded per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringRules {
    pub correct: i64,
    pub wrong_or_skipped: i64,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            correct: 10,
            wrong_or_skipped: -5,
        }
    }
}

impl ScoringRules {
    pub fn delta(&self, outcome: Outcome) -> i64 {
        match outcome {
            Outcome::Correct => self.correct,
            Outcome::WrongOrSkipped => self.wrong_or_skipped,
        }
    }
}

pub fn decide_outcome(selected: Option<&str>, answer: &str) -> Outcome {
    match selected {
        Some(selected) if selected == answer => Outcome::Correct,
        _ => Outcome::WrongOrSkipped,
    }
}

/// What a scoring attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreResult {
    /// The delta was written.
    Applied {
        outcome: Outcome,
        delta: i64,
        score: i64,
    },
    /// `lastAnsweredQuestion` already covered the question; nothing written.
    AlreadyScored { score: i64 },
}

impl ScoreResult {
    pub fn score(&self) -> i64 {
        match self {
            ScoreResult::Applied { score, .. } | ScoreResult::AlreadyScored { score } => *score,
        }
    }
}

/// Applies score deltas through partial merges guarded by `lastAnsweredQuestion`.
#[derive(Clone)]
pub struct ScoringReconciler {
    store: Arc<dyn SharedStore>,
    rules: ScoringRules,
}

impl ScoringReconciler {
    pub fn new(store: Arc<dyn SharedStore>, rules: ScoringRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> ScoringRules {
        self.rules
    }

    /// Score `question` for `team_id`.
    ///
    /// The marker written alongside the score is the (level, index) pair, so
    /// a team moving to a staged level starts that level unscored.
    ///
    /// The team record is re-read first so restarts and duplicate reveals
    /// observe earlier writes. Only `score` and `lastAnsweredQuestion` are
    /// written; the guard is best effort, two attempts racing before either
    /// write lands can both pass it.
    pub async fn score(
        &self,
        team_id: &str,
        question: QuestionKey,
        selected: Option<&str>,
        answer: &str,
    ) -> Result<ScoreResult, SessionError> {
        let path = StorePath::team(team_id);
        let record: TeamRecord = decode(self.store.get(path.clone()).await?)
            .map_err(|source| StorageError::malformed(path.to_string(), source))?
            .ok_or(AuthError::TeamNotFound)?;

        if record.has_scored(question) {
            debug!(
                team_id,
                level = question.level,
                question = question.index,
                last_answered_level = record.last_answered_level,
                last_answered = record.last_answered_question,
                "question already scored"
            );
            return Ok(ScoreResult::AlreadyScored {
                score: record.score,
            });
        }

        let outcome = decide_outcome(selected, answer);
        let delta = self.rules.delta(outcome);
        let update = ScoreFields::new(record.score + delta, question);
        let fields = to_fields(&update)
            .map_err(|source| StorageError::malformed(path.to_string(), source))?;
        self.store.update(path, fields).await?;

        info!(
            team_id,
            level = question.level,
            question = question.index,
            ?outcome,
            delta,
            score = update.score,
            "score applied"
        );
        Ok(ScoreResult::Applied {
            outcome,
            delta,
            score: update.score,
        })
    }
}
