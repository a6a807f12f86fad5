//! Participant sessions: one actor task per verified team, reconciling local
//! state with the authoritative round and team records.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::sleep,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    dao::{
        content::ContentLoader,
        models::{QuestionKey, RoundState, SelectionFields, TeamRecord, decode, to_fields},
        storage::{StorageError, StorageResult},
        store::{SharedStore, StorePath, Subscription},
    },
    dto::session::{QuestionView, SessionView, SyncStatus},
    error::{AuthError, SelectionError, ServiceError, SessionError},
    services::scoring::{ScoringReconciler, ScoringRules},
    state::{
        SharedState,
        clock::{DEFAULT_QUESTION_DURATION, QuestionTimer, SessionClock, TickSchedule, TimerMode, TimerSignal},
        quiz::{QuestionSet, option_seed},
        screen::{Screen, ScreenInputs, ScreenTable},
        state_machine::{SessionEvent, SessionPhase, SessionStateMachine, VerifiedPhase},
    },
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const COMMAND_CAPACITY: usize = 16;

/// When a selection is written to the team record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockInPolicy {
    /// Every accepted selection is written through immediately.
    #[default]
    Immediate,
    /// The selection stays local until the reveal scores it.
    AtReveal,
}

/// Behaviour shared by every session of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub timer_mode: TimerMode,
    pub question_duration: Duration,
    pub scoring: ScoringRules,
    pub lock_in: LockInPolicy,
    pub screens: ScreenTable,
    /// Fixed seed for option shuffles; random per session when absent.
    pub option_seed: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timer_mode: TimerMode::default(),
            question_duration: DEFAULT_QUESTION_DURATION,
            scoring: ScoringRules::default(),
            lock_in: LockInPolicy::default(),
            screens: ScreenTable::default(),
            option_seed: None,
        }
    }
}

#[derive(Debug)]
struct ActiveQuestion {
    level: u32,
    index: usize,
    text: String,
    options: Vec<String>,
    answer: String,
    timer: QuestionTimer,
    selected: Option<String>,
    selection_stored: bool,
    revealed: bool,
}

impl ActiveQuestion {
    fn key(&self) -> QuestionKey {
        QuestionKey::new(self.level, self.index)
    }

    fn view(&self) -> QuestionView {
        QuestionView {
            index: self.index,
            text: self.text.clone(),
            options: self.options.clone(),
            remaining_seconds: self.timer.remaining(),
            selected: self.selected.clone(),
            revealed: self.revealed,
            answer: self.revealed.then(|| self.answer.clone()),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingScore {
    question: QuestionKey,
    selected: Option<String>,
    answer: String,
}

/// State of one team's participant session.
///
/// All methods run on the owning task; nothing here is shared.
pub struct ClientSession {
    store: Arc<dyn SharedStore>,
    content: Arc<dyn ContentLoader>,
    settings: SessionSettings,
    scoring: ScoringReconciler,
    clock: SessionClock,
    seed: u64,
    machine: SessionStateMachine,
    team_id: Option<String>,
    team: Option<TeamRecord>,
    round: RoundState,
    questions: Option<Arc<QuestionSet>>,
    content_error: Option<String>,
    ended: bool,
    active: Option<ActiveQuestion>,
    ticks: Option<TickSchedule>,
    sync_error: Option<String>,
    pending_score: Option<PendingScore>,
    view: watch::Sender<SessionView>,
}

impl ClientSession {
    pub fn new(
        store: Arc<dyn SharedStore>,
        content: Arc<dyn ContentLoader>,
        settings: SessionSettings,
    ) -> Self {
        let scoring = ScoringReconciler::new(store.clone(), settings.scoring);
        let seed = settings.option_seed.unwrap_or_else(rand::random);
        let (view, _rx) = watch::channel(SessionView::unauthenticated());
        Self {
            store,
            content,
            settings,
            scoring,
            clock: SessionClock::start(),
            seed,
            machine: SessionStateMachine::new(),
            team_id: None,
            team: None,
            round: RoundState::default(),
            questions: None,
            content_error: None,
            ended: false,
            active: None,
            ticks: None,
            sync_error: None,
            pending_score: None,
            view,
        }
    }

    /// Use `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: SessionClock) -> Self {
        self.clock = clock;
        self
    }

    /// Create a session, authenticate it and spawn its task.
    pub async fn open(
        store: Arc<dyn SharedStore>,
        content: Arc<dyn ContentLoader>,
        settings: SessionSettings,
        team_id: Option<&str>,
        passcode: &str,
    ) -> Result<SessionHandle, SessionError> {
        let mut session = Self::new(store, content, settings);
        session.authenticate(team_id, passcode).await?;
        session.spawn()
    }

    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.as_deref()
    }

    /// Check the passcode against the team record.
    ///
    /// Failures leave the session unauthenticated and write nothing. On
    /// success the current round is read right away so the first screen is
    /// correct without waiting for a change notification.
    pub async fn authenticate(
        &mut self,
        team_id: Option<&str>,
        passcode: &str,
    ) -> Result<SessionView, SessionError> {
        let team_id = team_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingLink)?
            .to_string();

        let plan = self.machine.plan(SessionEvent::Authenticated)?;
        self.publish();

        let outcome = match self.read_team(&team_id).await {
            Ok(Some(record)) if record.passcode == passcode => Ok(record),
            Ok(Some(_)) => Err(AuthError::WrongPasscode.into()),
            Ok(None) => Err(AuthError::TeamNotFound.into()),
            Err(err) => Err(err),
        };
        let record = match outcome {
            Ok(record) => record,
            Err(err) => {
                if let Err(abort_err) = self.machine.abort(plan.id) {
                    warn!(team_id = %team_id, error = ?abort_err, "failed to abort authentication plan");
                }
                debug!(team_id = %team_id, error = %err, "authentication failed");
                self.publish();
                return Err(err);
            }
        };

        self.machine.apply(plan.id).map_err(|err| {
            warn!(team_id = %team_id, error = ?err, "failed to apply authentication plan");
            SessionError::Closed
        })?;
        info!(team_id = %team_id, score = record.score, qualified = record.qualified, "team verified");
        self.team_id = Some(team_id.clone());
        self.team = Some(record);

        match self.read_round().await {
            Ok(round) => self.apply_round(round, true).await,
            Err(err) => self.set_sync_error(&err),
        }
        self.publish();
        Ok(self.view())
    }

    /// Re-read the round and the team record, then apply them team first.
    pub async fn restore_state(&mut self) -> Result<(), SessionError> {
        let team_id = self.team_id.clone().ok_or(AuthError::MissingLink)?;
        let snapshot = async {
            let team = self.read_team(&team_id).await?.ok_or(AuthError::TeamNotFound)?;
            let round = self.read_round().await?;
            Ok::<_, SessionError>((team, round))
        }
        .await;

        match snapshot {
            Ok((team, round)) => {
                self.sync_error = None;
                self.apply_team(team);
                self.apply_round(round, true).await;
                self.publish();
                Ok(())
            }
            Err(err) => {
                self.set_sync_error(&err);
                self.publish();
                Err(err)
            }
        }
    }

    /// React to a change of the round document.
    pub async fn on_authoritative_change(&mut self, round: RoundState) {
        if !self.machine.is_verified() {
            return;
        }
        self.apply_round(round, false).await;
        self.publish();
    }

    /// React to a change of this team's record.
    pub async fn on_team_change(&mut self, record: TeamRecord) {
        if !self.machine.is_verified() {
            return;
        }
        self.apply_team(record);
        let round = self.round.clone();
        self.apply_round(round, false).await;
        self.publish();
    }

    /// Record `option` for the active question, replacing any earlier pick.
    pub async fn select_option(&mut self, option: &str) -> Result<SessionView, SessionError> {
        if self.machine.phase() != SessionPhase::Verified(VerifiedPhase::Answering) {
            return Err(SelectionError::NotAnswering.into());
        }
        let now = self.clock.now();
        let Some(active) = self.active.as_mut() else {
            return Err(SelectionError::NotAnswering.into());
        };
        if active.timer.tick(now) == Some(0) {
            self.reveal().await;
            self.publish();
            return Err(SelectionError::TimeExpired.into());
        }
        if !active.options.iter().any(|candidate| candidate == option) {
            return Err(SelectionError::UnknownOption(option.to_string()).into());
        }

        active.selected = Some(option.to_string());
        active.selection_stored = false;
        debug!(team_id = ?self.team_id, question = active.index, option, "option selected");

        let result = self.store_selection().await;
        self.publish();
        result.map(|()| self.view())
    }

    /// Local one-second tick for `question`.
    pub async fn on_tick(&mut self, question: usize) {
        let now = self.clock.now();
        let remaining = match self.active.as_mut() {
            Some(active) if active.index == question && !active.revealed => active.timer.tick(now),
            _ => {
                debug!(question, "stale tick ignored");
                if self.ticks.as_ref().is_some_and(|ticks| ticks.question() == question) {
                    self.cancel_ticks();
                }
                return;
            }
        };
        if remaining == Some(0) {
            self.reveal().await;
        }
        self.publish();
    }

    /// Lock the answer in, show it and score the question. Only the first call
    /// per question has any effect.
    pub async fn reveal(&mut self) {
        self.cancel_ticks();
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.revealed {
            return;
        }
        active.revealed = true;
        let pending = PendingScore {
            question: active.key(),
            selected: active.selected.clone(),
            answer: active.answer.clone(),
        };
        info!(
            team_id = ?self.team_id,
            level = pending.question.level,
            question = pending.question.index,
            "answer revealed"
        );
        self.sync_phase();
        if let Err(err) = self.apply_score(pending).await {
            debug!(error = %err, "score kept pending until the next retry");
        }
    }

    /// Re-read everything and flush writes that failed earlier.
    pub async fn retry(&mut self) -> Result<SessionView, SessionError> {
        self.restore_state().await?;
        self.flush_pending().await?;
        self.publish();
        Ok(self.view())
    }

    /// Snapshot of what the client should render.
    pub fn view(&self) -> SessionView {
        let screen = self.screen();
        let team = self.team.as_ref();
        let message = match screen {
            Screen::SyncError => self.sync_error.clone(),
            Screen::ContentUnavailable => self.content_error.clone(),
            _ => None,
        };
        SessionView {
            team_id: self.team_id.clone(),
            phase: self.machine.phase().into(),
            screen,
            sync: if self.sync_error.is_some() {
                SyncStatus::Error
            } else {
                SyncStatus::Synced
            },
            message,
            score: team.map_or(0, |team| team.score),
            qualified: team.is_some_and(|team| team.qualified),
            level: team.map_or(1, |team| team.level),
            question: self
                .active
                .as_ref()
                .filter(|_| screen.shows_question())
                .map(ActiveQuestion::view),
            score_pending: self.pending_score.is_some(),
        }
    }

    /// Screen derived from the whole snapshot.
    pub fn screen(&self) -> Screen {
        if !self.machine.is_verified() {
            return Screen::Passcode;
        }
        if self.sync_error.is_some() {
            return Screen::SyncError;
        }
        let screen = self.decided_screen();
        if screen.shows_question() {
            if self.content_error.is_some() {
                return Screen::ContentUnavailable;
            }
            if self.ended {
                return Screen::Ended;
            }
        }
        screen
    }

    /// Receiver following every published view.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    /// Move the session onto its own task.
    pub fn spawn(self) -> Result<SessionHandle, SessionError> {
        let team_id = self.team_id.clone().ok_or(AuthError::MissingLink)?;
        let (commands, receiver) = mpsc::channel(COMMAND_CAPACITY);
        let view = self.watch();
        let span = info_span!("session", team_id = %team_id);
        tokio::spawn(self.run(receiver).instrument(span));
        Ok(SessionHandle {
            team_id,
            commands,
            view,
        })
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        let mut round_feed = None;
        let mut team_feed = None;
        match self.subscribe_feeds().await {
            Ok((round, team)) => {
                round_feed = Some(round);
                team_feed = Some(team);
            }
            Err(err) => {
                self.set_sync_error(&err);
                self.publish();
            }
        }
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let offline = round_feed.is_none() || team_feed.is_none();
            let wake = tokio::select! {
                command = commands.recv() => Wake::Command(command),
                update = next_update(&mut round_feed) => Wake::Round(update),
                update = next_update(&mut team_feed) => Wake::Team(update),
                question = next_tick(&mut self.ticks) => Wake::Tick(question),
                _ = sleep(backoff), if offline => Wake::Reconnect,
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(SessionCommand::Shutdown)) => break,
                Wake::Command(Some(SessionCommand::Select { option, reply })) => {
                    let _ = reply.send(self.select_option(&option).await);
                }
                Wake::Command(Some(SessionCommand::Retry { reply })) => {
                    let result = if offline {
                        match self.reconnect().await {
                            Ok((round, team)) => {
                                round_feed = Some(round);
                                team_feed = Some(team);
                                backoff = INITIAL_BACKOFF;
                                Ok(self.view())
                            }
                            Err(err) => Err(err),
                        }
                    } else {
                        self.retry().await
                    };
                    let _ = reply.send(result);
                }
                Wake::Round(Some(Ok(value))) => match decode::<RoundState>(value) {
                    Ok(round) => self.on_authoritative_change(round.unwrap_or_default()).await,
                    Err(source) => self.feed_malformed(StorePath::Admin, source),
                },
                Wake::Team(Some(Ok(value))) => {
                    let path = self.team_path();
                    match decode::<TeamRecord>(value) {
                        Ok(Some(record)) => self.on_team_change(record).await,
                        Ok(None) => {
                            self.set_sync_error(&SessionError::Auth(AuthError::TeamNotFound));
                            self.publish();
                        }
                        Err(source) => self.feed_malformed(path, source),
                    }
                }
                Wake::Round(lost) | Wake::Team(lost) => {
                    match lost {
                        Some(Err(err)) => warn!(error = %err, "subscription failed"),
                        _ => warn!("subscription ended"),
                    }
                    for feed in [round_feed.take(), team_feed.take()].into_iter().flatten() {
                        feed.cancel();
                    }
                    self.sync_error = Some("connection to the store lost".into());
                    self.publish();
                    backoff = INITIAL_BACKOFF;
                }
                Wake::Tick(question) => self.on_tick(question).await,
                Wake::Reconnect => match self.reconnect().await {
                    Ok((round, team)) => {
                        round_feed = Some(round);
                        team_feed = Some(team);
                        backoff = INITIAL_BACKOFF;
                    }
                    Err(err) => {
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        debug!(error = %err, retry_in = ?backoff, "reconnect failed");
                    }
                },
            }
        }

        for feed in [round_feed, team_feed].into_iter().flatten() {
            feed.cancel();
        }
        self.cancel_ticks();
        info!("session closed");
    }

    async fn reconnect(&mut self) -> Result<(Subscription, Subscription), SessionError> {
        self.restore_state().await?;
        let feeds = self.subscribe_feeds().await.inspect_err(|err| {
            self.set_sync_error(err);
            self.publish();
        })?;
        info!("session resynchronised");
        if self.flush_pending().await.is_ok() {
            self.publish();
        }
        Ok(feeds)
    }

    async fn subscribe_feeds(&self) -> Result<(Subscription, Subscription), SessionError> {
        let round = self.store.subscribe(StorePath::Admin).await?;
        let team = self.store.subscribe(self.team_path()).await?;
        Ok((round, team))
    }

    fn feed_malformed(&mut self, path: StorePath, source: serde_json::Error) {
        let err = StorageError::malformed(path.to_string(), source);
        self.set_sync_error(&err.into());
        self.publish();
    }

    fn team_path(&self) -> StorePath {
        StorePath::team(self.team_id.clone().unwrap_or_default())
    }

    async fn read_team(&self, team_id: &str) -> Result<Option<TeamRecord>, SessionError> {
        let path = StorePath::team(team_id);
        let value = self.store.get(path.clone()).await?;
        Ok(decode(value).map_err(|source| StorageError::malformed(path.to_string(), source))?)
    }

    async fn read_round(&self) -> Result<RoundState, SessionError> {
        let value = self.store.get(StorePath::Admin).await?;
        let round = decode::<RoundState>(value)
            .map_err(|source| StorageError::malformed(StorePath::Admin.to_string(), source))?;
        Ok(round.unwrap_or_default())
    }

    fn apply_team(&mut self, record: TeamRecord) {
        let level_changed = self
            .team
            .as_ref()
            .is_some_and(|team| team.level != record.level);
        if let Some(pending) = &self.pending_score
            && record.has_scored(pending.question)
        {
            debug!(question = pending.question.index, "pending score already stored");
            self.pending_score = None;
        }
        self.team = Some(record);

        if level_changed {
            info!(team_id = ?self.team_id, "team level changed; reloading content");
            self.questions = None;
            self.content_error = None;
            self.drop_active();
        }
    }

    fn decided_screen(&self) -> Screen {
        let (level, qualified) = self
            .team
            .as_ref()
            .map_or((1, false), |team| (team.level, team.qualified));
        self.settings.screens.decide(ScreenInputs {
            level,
            qualified,
            quiz_started: self.round.quiz_started,
            waiting_room_open: self.round.waiting_room_open,
        })
    }

    /// Fold a round snapshot in: active question, timing, phase.
    async fn apply_round(&mut self, round: RoundState, first_load: bool) {
        self.round = round;
        let target = self
            .round
            .current_question_index
            .filter(|_| self.decided_screen().shows_question());

        match target {
            None => {
                self.ended = false;
                self.drop_active();
            }
            Some(index) => self.reconcile_question(index, first_load).await,
        }
        self.sync_phase();
    }

    async fn reconcile_question(&mut self, index: usize, first_load: bool) {
        let level = self.team.as_ref().map_or(1, |team| team.level);
        let Some(questions) = self.ensure_questions(level).await else {
            self.drop_active();
            return;
        };

        let Some(question) = questions.get(index) else {
            if !self.ended {
                info!(team_id = ?self.team_id, index, total = questions.len(), "question set exhausted");
            }
            self.settle_active().await;
            self.ended = true;
            self.drop_active();
            return;
        };
        self.ended = false;
        let key = QuestionKey::new(questions.level(), index);

        if self.active.as_ref().is_none_or(|active| active.key() != key) {
            let previous_start = self.active.as_ref().and_then(|active| active.timer.start());
            self.settle_active().await;
            self.drop_active();
            let timer = if first_load {
                QuestionTimer::restored(self.settings.timer_mode, self.settings.question_duration, index)
            } else {
                QuestionTimer::live(
                    self.settings.timer_mode,
                    self.settings.question_duration,
                    index,
                    previous_start,
                )
            };

            let team = self.team.as_ref();
            let already_scored = team.is_some_and(|team| team.has_scored(key));
            let selected = match self.settings.lock_in {
                LockInPolicy::Immediate => team
                    .and_then(|team| team.selection_for(key))
                    .filter(|option| question.has_option(option))
                    .map(str::to_string),
                LockInPolicy::AtReveal => None,
            };
            debug!(team_id = ?self.team_id, index, already_scored, "question loaded");
            self.active = Some(ActiveQuestion {
                level: key.level,
                index,
                text: question.text().to_string(),
                options: question.shuffled_options(option_seed(self.seed, index)),
                answer: question.answer().to_string(),
                timer,
                selection_stored: selected.is_some(),
                selected,
                revealed: already_scored,
            });
        }

        let now = self.clock.now();
        let round = &self.round;
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.revealed {
            return;
        }
        match active.timer.observe(round, now) {
            TimerSignal::Unchanged => {}
            TimerSignal::Restarted => {
                let question = active.index;
                let expired = active.timer.expired();
                let needs_ticks = active.timer.needs_ticks();
                self.cancel_ticks();
                if expired {
                    self.reveal().await;
                } else if needs_ticks {
                    self.ticks = Some(TickSchedule::every_second(question));
                }
            }
            TimerSignal::Updated => {
                if active.timer.expired() {
                    self.reveal().await;
                }
            }
        }
    }

    async fn ensure_questions(&mut self, level: u32) -> Option<Arc<QuestionSet>> {
        if let Some(questions) = &self.questions
            && questions.level() == level
        {
            return Some(questions.clone());
        }

        match self.content.load_questions(level).await {
            Ok(questions) => {
                self.content_error = None;
                self.questions = Some(questions.clone());
                Some(questions)
            }
            Err(err) => {
                if self.content_error.is_none() {
                    warn!(team_id = ?self.team_id, level, error = %err, "quiz content unavailable");
                }
                self.content_error = Some(SessionError::from(err).to_string());
                self.questions = None;
                None
            }
        }
    }

    fn sync_phase(&mut self) {
        if !self.machine.is_verified() {
            return;
        }
        let target = self.target_phase();
        let current = self.machine.phase();
        if current == SessionPhase::Verified(target) {
            return;
        }

        let mut steps = Vec::with_capacity(3);
        if current == SessionPhase::Verified(VerifiedPhase::Qualified) {
            steps.push(SessionEvent::Hold);
        }
        steps.extend_from_slice(match target {
            VerifiedPhase::Waiting => &[SessionEvent::Hold][..],
            VerifiedPhase::Answering => &[SessionEvent::OpenQuestion],
            VerifiedPhase::Revealed => &[SessionEvent::OpenQuestion, SessionEvent::Reveal],
            VerifiedPhase::Qualified => &[SessionEvent::Qualify],
            VerifiedPhase::Ended => &[SessionEvent::Finish],
        });

        for event in steps {
            if let Err(err) = self.machine.transition(event) {
                warn!(?event, error = ?err, "session transition refused");
                break;
            }
        }
    }

    fn target_phase(&self) -> VerifiedPhase {
        let screen = self.decided_screen();
        if screen == Screen::Qualified {
            return VerifiedPhase::Qualified;
        }
        if !screen.shows_question() {
            return VerifiedPhase::Waiting;
        }
        if self.ended {
            return VerifiedPhase::Ended;
        }
        match &self.active {
            Some(active) if active.revealed => VerifiedPhase::Revealed,
            Some(_) => VerifiedPhase::Answering,
            None => VerifiedPhase::Waiting,
        }
    }

    async fn apply_score(&mut self, pending: PendingScore) -> Result<(), SessionError> {
        let team_id = self.team_id.clone().ok_or(AuthError::MissingLink)?;
        match self
            .scoring
            .score(&team_id, pending.question, pending.selected.as_deref(), &pending.answer)
            .await
        {
            Ok(result) => {
                if let Some(team) = self.team.as_mut() {
                    team.score = result.score();
                    team.mark_scored(pending.question);
                }
                self.pending_score = None;
                Ok(())
            }
            Err(err) => {
                warn!(
                    team_id = %team_id,
                    level = pending.question.level,
                    question = pending.question.index,
                    error = %err,
                    "score left pending"
                );
                self.pending_score = Some(pending);
                self.set_sync_error(&err);
                Err(err)
            }
        }
    }

    async fn store_selection(&mut self) -> Result<(), SessionError> {
        if self.settings.lock_in != LockInPolicy::Immediate {
            return Ok(());
        }
        let Some(active) = self.active.as_ref() else {
            return Ok(());
        };
        let (Some(option), false) = (active.selected.clone(), active.selection_stored) else {
            return Ok(());
        };
        let fields = SelectionFields {
            selected_option: option,
            selected_for_question: active.index,
            selected_for_level: active.level,
        };
        let path = self.team_path();
        let write = async {
            let fields = to_fields(&fields)
                .map_err(|source| StorageError::malformed(path.to_string(), source))?;
            self.store.update(path.clone(), fields).await
        };
        match write.await {
            Ok(()) => {
                if let Some(active) = self.active.as_mut() {
                    active.selection_stored = true;
                }
                Ok(())
            }
            Err(err) => {
                let err = SessionError::from(err);
                self.set_sync_error(&err);
                Err(err)
            }
        }
    }

    async fn flush_pending(&mut self) -> Result<(), SessionError> {
        if let Some(pending) = self.pending_score.take() {
            self.apply_score(pending).await?;
        }
        self.store_selection().await?;
        self.sync_error = None;
        Ok(())
    }

    fn set_sync_error(&mut self, err: &SessionError) {
        warn!(team_id = ?self.team_id, error = %err, "session out of sync");
        self.sync_error = Some(err.to_string());
    }

    /// Reveal the active question before the round moves past it, so a
    /// question replaced while still open is scored like one that ran out.
    async fn settle_active(&mut self) {
        if self.active.as_ref().is_some_and(|active| !active.revealed) {
            debug!(team_id = ?self.team_id, "round moved on from an open question");
            self.reveal().await;
        }
    }

    fn drop_active(&mut self) {
        self.cancel_ticks();
        self.active = None;
    }

    fn cancel_ticks(&mut self) {
        if let Some(ticks) = self.ticks.take() {
            ticks.cancel();
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.view());
    }
}

enum Wake {
    Command(Option<SessionCommand>),
    Round(Option<StorageResult<Option<Value>>>),
    Team(Option<StorageResult<Option<Value>>>),
    Tick(usize),
    Reconnect,
}

async fn next_update(feed: &mut Option<Subscription>) -> Option<StorageResult<Option<Value>>> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(schedule: &mut Option<TickSchedule>) -> usize {
    match schedule {
        Some(schedule) => schedule.tick().await,
        None => std::future::pending().await,
    }
}

enum SessionCommand {
    Select {
        option: String,
        reply: oneshot::Sender<Result<SessionView, SessionError>>,
    },
    Retry {
        reply: oneshot::Sender<Result<SessionView, SessionError>>,
    },
    Shutdown,
}

/// Cloneable handle on a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    team_id: String,
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Receiver notified on every published view.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub async fn select_option(
        &self,
        option: impl Into<String>,
    ) -> Result<SessionView, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Select {
            option: option.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn retry(&self) -> Result<SessionView, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Retry { reply }).await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Ask the task to stop; already-stopped sessions are ignored.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

/// Authenticate a team and register its session, replacing any older one.
pub async fn open_session(
    state: &SharedState,
    team_id: Option<String>,
    passcode: String,
) -> Result<SessionView, ServiceError> {
    let store = state.require_store().await?;
    let handle = ClientSession::open(
        store,
        state.content(),
        state.config().session().clone(),
        team_id.as_deref(),
        &passcode,
    )
    .await?;

    let view = handle.view();
    if let Some(previous) = state
        .sessions()
        .insert(handle.team_id().to_string(), handle)
    {
        info!(team_id = previous.team_id(), "replacing existing session");
        previous.shutdown().await;
    }
    Ok(view)
}

/// Handle of the live session for `team_id`.
pub fn session(state: &SharedState, team_id: &str) -> Result<SessionHandle, ServiceError> {
    let handle = state
        .sessions()
        .get(team_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ServiceError::NotFound(format!("no session for team `{team_id}`")))?;
    if handle.is_closed() {
        state.sessions().remove_if(team_id, |_, current| current.is_closed());
        return Err(ServiceError::NotFound(format!(
            "session for team `{team_id}` has stopped"
        )));
    }
    Ok(handle)
}

pub fn current_view(state: &SharedState, team_id: &str) -> Result<SessionView, ServiceError> {
    Ok(session(state, team_id)?.view())
}

pub async fn select_option(
    state: &SharedState,
    team_id: &str,
    option: String,
) -> Result<SessionView, ServiceError> {
    Ok(session(state, team_id)?.select_option(option).await?)
}

pub async fn retry(state: &SharedState, team_id: &str) -> Result<SessionView, ServiceError> {
    Ok(session(state, team_id)?.retry().await?)
}

pub async fn close_session(state: &SharedState, team_id: &str) -> Result<(), ServiceError> {
    let (_, handle) = state
        .sessions()
        .remove(team_id)
        .ok_or_else(|| ServiceError::NotFound(format!("no session for team `{team_id}`")))?;
    handle.shutdown().await;
    info!(team_id, "session closed on request");
    Ok(())
}
