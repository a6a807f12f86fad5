//! Reference admin controller: the single writer of the round document, plus
//! the team fields only the admin may touch.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{Fields, RoundFields, RoundState, TeamAdminFields, TeamRecord, decode, to_fields},
        storage::StorageError,
        store::{SharedStore, StorePath},
    },
    dto::{
        admin::{ActionResponse, CreateTeamRequest, TeamStatusRequest},
        validation::validate_passcode_length,
    },
    error::ServiceError,
    state::{
        SharedState,
        clock::{SessionClock, TICK_PERIOD, TimerMode},
    },
};

/// Writes round state and admin-owned team fields.
///
/// Clones share the countdown task, so publishing from any clone stops the
/// countdown of the previous question.
#[derive(Clone)]
pub struct AdminController {
    store: Arc<dyn SharedStore>,
    timer_mode: TimerMode,
    duration: Duration,
    clock: SessionClock,
    countdown: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AdminController {
    pub fn new(store: Arc<dyn SharedStore>, timer_mode: TimerMode, duration: Duration) -> Self {
        Self {
            store,
            timer_mode,
            duration,
            clock: SessionClock::start(),
            countdown: Arc::new(Mutex::new(None)),
        }
    }

    /// Use `clock` for published start instants.
    pub fn with_clock(mut self, clock: SessionClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn timer_mode(&self) -> TimerMode {
        self.timer_mode
    }

    /// Current round document, defaults when absent.
    pub async fn round(&self) -> Result<RoundState, ServiceError> {
        let value = self.store.get(StorePath::Admin).await?;
        let round = decode::<RoundState>(value)
            .map_err(|source| StorageError::malformed(StorePath::Admin.to_string(), source))?;
        Ok(round.unwrap_or_default())
    }

    pub async fn set_waiting_room(&self, open: bool) -> Result<(), ServiceError> {
        self.write_round(
            RoundFields {
                waiting_room_open: Some(open),
                ..RoundFields::default()
            },
            &[],
        )
        .await?;
        info!(open, "waiting room updated");
        Ok(())
    }

    /// Start the quiz at `level` with no question open yet.
    pub async fn start_quiz(&self, level: u32) -> Result<(), ServiceError> {
        if level == 0 {
            return Err(ServiceError::InvalidInput("levels start at 1".into()));
        }
        self.stop_countdown().await;
        self.write_round(
            RoundFields {
                quiz_started: Some(true),
                level: Some(level),
                waiting_room_open: Some(false),
                ..RoundFields::default()
            },
            &["currentQuestionIndex", "questionStartTime", "timeLeft"],
        )
        .await?;
        info!(level, "quiz started");
        Ok(())
    }

    pub async fn end_quiz(&self) -> Result<(), ServiceError> {
        self.stop_countdown().await;
        self.write_round(
            RoundFields {
                quiz_started: Some(false),
                ..RoundFields::default()
            },
            &["currentQuestionIndex", "questionStartTime", "timeLeft"],
        )
        .await?;
        info!("quiz ended");
        Ok(())
    }

    /// Open question `index` for every team.
    ///
    /// Absolute-start timing writes the index and the start instant together.
    /// Pushed-countdown timing writes the index with a full countdown, then a
    /// background task republishes `timeLeft` every second.
    pub async fn publish_question(&self, index: usize) -> Result<(), ServiceError> {
        let round = self.round().await?;
        if !round.quiz_started {
            return Err(ServiceError::InvalidState(
                "publish a question only while the quiz is running".into(),
            ));
        }

        let mut countdown = self.countdown.lock().await;
        if let Some(previous) = countdown.take() {
            previous.abort();
        }

        match self.timer_mode {
            TimerMode::AbsoluteStart => {
                let start = self.clock.now();
                self.write_round(
                    RoundFields {
                        current_question_index: Some(index),
                        question_start_time: Some(start),
                        ..RoundFields::default()
                    },
                    &["timeLeft"],
                )
                .await?;
            }
            TimerMode::PushedCountdown => {
                let seconds = i64::try_from(self.duration.as_secs()).unwrap_or(i64::MAX);
                self.write_round(
                    RoundFields {
                        current_question_index: Some(index),
                        time_left: Some(seconds),
                        ..RoundFields::default()
                    },
                    &["questionStartTime"],
                )
                .await?;
                *countdown = Some(tokio::spawn(run_countdown(self.store.clone(), index, seconds)));
            }
        }
        info!(index, mode = ?self.timer_mode, "question published");
        Ok(())
    }

    /// Close the open question early by pushing a zero countdown.
    pub async fn expire_question(&self) -> Result<(), ServiceError> {
        self.stop_countdown().await;
        self.write_round(
            RoundFields {
                time_left: Some(0),
                ..RoundFields::default()
            },
            &[],
        )
        .await?;
        info!("question expired by admin");
        Ok(())
    }

    /// Register a team with a fresh record.
    pub async fn create_team(&self, team_id: &str, passcode: &str) -> Result<(), ServiceError> {
        let path = StorePath::team(team_id);
        if self.store.get(path.clone()).await?.is_some() {
            return Err(ServiceError::InvalidState(format!(
                "team `{team_id}` already exists"
            )));
        }
        let fields = to_fields(&TeamRecord::new(passcode))
            .map_err(|source| StorageError::malformed(path.to_string(), source))?;
        self.store.update(path, fields).await?;
        info!(team_id, "team created");
        Ok(())
    }

    /// Update `qualified` and/or `level` of an existing team.
    pub async fn set_team_status(
        &self,
        team_id: &str,
        status: TeamAdminFields,
    ) -> Result<(), ServiceError> {
        let path = StorePath::team(team_id);
        if self.store.get(path.clone()).await?.is_none() {
            return Err(ServiceError::NotFound(format!("team `{team_id}` not found")));
        }
        if status.level == Some(0) {
            return Err(ServiceError::InvalidInput("levels start at 1".into()));
        }
        let fields = to_fields(&status)
            .map_err(|source| StorageError::malformed(path.to_string(), source))?;
        if fields.is_empty() {
            return Err(ServiceError::InvalidInput("nothing to update".into()));
        }
        self.store.update(path, fields).await?;
        info!(team_id, qualified = ?status.qualified, level = ?status.level, "team status updated");
        Ok(())
    }

    async fn stop_countdown(&self) {
        if let Some(task) = self.countdown.lock().await.take() {
            task.abort();
            debug!("countdown stopped");
        }
    }

    /// Merge `fields` into the round document, nulling every key in `clear`.
    async fn write_round(&self, fields: RoundFields, clear: &[&str]) -> Result<(), ServiceError> {
        let mut fields: Fields = to_fields(&fields)
            .map_err(|source| StorageError::malformed(StorePath::Admin.to_string(), source))?;
        for key in clear {
            fields.insert((*key).to_string(), Value::Null);
        }
        self.store.update(StorePath::Admin, fields).await?;
        Ok(())
    }
}

async fn run_countdown(store: Arc<dyn SharedStore>, question: usize, seconds: i64) {
    let mut ticks = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
    let mut left = seconds;
    while left > 0 {
        ticks.tick().await;
        left -= 1;
        let fields = match to_fields(&RoundFields {
            time_left: Some(left),
            ..RoundFields::default()
        }) {
            Ok(fields) => fields,
            Err(err) => {
                warn!(error = %err, "failed to encode countdown");
                return;
            }
        };
        if let Err(err) = store.update(StorePath::Admin, fields).await {
            // Keep counting; the next push repairs the stored value.
            warn!(question, left, error = %err, "failed to push countdown");
        }
    }
    debug!(question, "countdown finished");
}

pub async fn set_waiting_room(state: &SharedState, open: bool) -> Result<ActionResponse, ServiceError> {
    state.admin().await?.set_waiting_room(open).await?;
    let status = if open { "opened" } else { "closed" };
    Ok(ActionResponse::new(format!("waiting room {status}")))
}

pub async fn start_quiz(state: &SharedState, level: u32) -> Result<ActionResponse, ServiceError> {
    state.admin().await?.start_quiz(level).await?;
    Ok(ActionResponse::new(format!("quiz started at level {level}")))
}

pub async fn end_quiz(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    state.admin().await?.end_quiz().await?;
    Ok(ActionResponse::new("quiz ended"))
}

pub async fn publish_question(
    state: &SharedState,
    index: usize,
) -> Result<ActionResponse, ServiceError> {
    state.admin().await?.publish_question(index).await?;
    Ok(ActionResponse::new(format!("question {index} published")))
}

pub async fn expire_question(state: &SharedState) -> Result<ActionResponse, ServiceError> {
    state.admin().await?.expire_question().await?;
    Ok(ActionResponse::new("question expired"))
}

pub async fn round(state: &SharedState) -> Result<RoundState, ServiceError> {
    state.admin().await?.round().await
}

pub async fn create_team(
    state: &SharedState,
    request: CreateTeamRequest,
) -> Result<ActionResponse, ServiceError> {
    validate_passcode_length(&request.passcode, state.config().passcode_length())
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let team_id = request.team_id.trim();
    state
        .admin()
        .await?
        .create_team(team_id, &request.passcode)
        .await?;
    Ok(ActionResponse::new(format!("team `{team_id}` created")))
}

pub async fn set_team_status(
    state: &SharedState,
    team_id: &str,
    request: TeamStatusRequest,
) -> Result<ActionResponse, ServiceError> {
    let status = TeamAdminFields {
        qualified: request.qualified,
        level: request.level,
    };
    state.admin().await?.set_team_status(team_id, status).await?;
    Ok(ActionResponse::new(format!("team `{team_id}` updated")))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;

    use super::*;
    use crate::dao::store::memory::MemoryStore;

    fn t0() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn controller(store: &MemoryStore, mode: TimerMode) -> AdminController {
        AdminController::new(Arc::new(store.clone()), mode, Duration::from_secs(10))
            .with_clock(SessionClock::anchored_at(t0()))
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_publish_writes_index_and_start_together() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::AbsoluteStart);
        admin.start_quiz(1).await.unwrap();
        let before = store.write_count();

        admin.publish_question(2).await.unwrap();
        assert_eq!(store.write_count(), before + 1);
        let round = admin.round().await.unwrap();
        assert_eq!(round.current_question_index, Some(2));
        assert_eq!(round.question_start_time, Some(t0()));
        assert_eq!(round.time_left, None);
    }

    #[tokio::test(start_paused = true)]
    async fn publishing_requires_a_running_quiz() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::AbsoluteStart);
        let err = admin.publish_question(0).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_decrements_every_second() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::PushedCountdown);
        admin.start_quiz(1).await.unwrap();
        admin.publish_question(0).await.unwrap();
        assert_eq!(admin.round().await.unwrap().time_left, Some(10));

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(admin.round().await.unwrap().time_left, Some(7));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(admin.round().await.unwrap().time_left, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn next_publish_stops_previous_countdown() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::PushedCountdown);
        admin.start_quiz(1).await.unwrap();
        admin.publish_question(0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(4_100)).await;

        admin.clone().publish_question(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let round = admin.round().await.unwrap();
        assert_eq!(round.current_question_index, Some(1));
        assert_eq!(round.time_left, Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn start_quiz_clears_previous_question() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::AbsoluteStart);
        admin.start_quiz(1).await.unwrap();
        admin.publish_question(3).await.unwrap();
        admin.end_quiz().await.unwrap();

        admin.start_quiz(2).await.unwrap();
        let round = admin.round().await.unwrap();
        assert!(round.quiz_started);
        assert_eq!(round.level, 2);
        assert_eq!(round.current_question_index, None);
        assert_eq!(round.question_start_time, None);
    }

    #[tokio::test]
    async fn team_status_only_touches_admin_fields() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::AbsoluteStart);
        admin.create_team("T1", "123456").await.unwrap();
        admin
            .set_team_status(
                "T1",
                TeamAdminFields {
                    qualified: Some(true),
                    level: None,
                },
            )
            .await
            .unwrap();

        let record = store.snapshot(&StorePath::team("T1")).unwrap();
        assert_eq!(record["qualified"], json!(true));
        assert_eq!(record["level"], json!(1));
        assert_eq!(record["passcode"], json!("123456"));
    }

    #[tokio::test]
    async fn duplicate_and_unknown_teams_are_refused() {
        let store = MemoryStore::new();
        let admin = controller(&store, TimerMode::AbsoluteStart);
        admin.create_team("T1", "123456").await.unwrap();
        assert!(matches!(
            admin.create_team("T1", "654321").await.unwrap_err(),
            ServiceError::InvalidState(_)
        ));
        assert!(matches!(
            admin
                .set_team_status("T9", TeamAdminFields { qualified: Some(true), level: None })
                .await
                .unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
