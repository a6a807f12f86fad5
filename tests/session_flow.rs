use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde_json::json;
use tokio::time::{sleep, timeout};

use quiz_room::{
    config::AppConfig,
    dao::{
        content::StaticContentLoader,
        models::{QuestionEntity, TeamAdminFields},
        store::{StorePath, memory::MemoryStore},
    },
    dto::{
        phase::VisibleSessionPhase,
        session::{SessionView, SyncStatus},
    },
    error::{SelectionError, ServiceError, SessionError},
    services::{
        admin_service::AdminController,
        session_service::{self, ClientSession, SessionHandle, SessionSettings},
    },
    state::{AppState, clock::SessionClock, clock::TimerMode, screen::Screen},
};

const PASSCODE: &str = "123456";

fn t0() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn questions() -> Vec<QuestionEntity> {
    vec![
        QuestionEntity {
            question: "Capital of France?".into(),
            options: vec!["Paris".into(), "Rome".into(), "Oslo".into()],
            answer: "Paris".into(),
        },
        QuestionEntity {
            question: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            answer: "4".into(),
        },
    ]
}

struct Room {
    store: MemoryStore,
    admin: AdminController,
    clock: SessionClock,
    settings: SessionSettings,
}

impl Room {
    async fn new(mode: TimerMode, seconds: u64) -> Self {
        let store = MemoryStore::new();
        let clock = SessionClock::anchored_at(t0());
        let duration = Duration::from_secs(seconds);
        let admin = AdminController::new(Arc::new(store.clone()), mode, duration).with_clock(clock);
        for team in ["A", "B", "C"] {
            admin.create_team(team, PASSCODE).await.unwrap();
        }
        let settings = SessionSettings {
            timer_mode: mode,
            question_duration: duration,
            option_seed: Some(1),
            ..SessionSettings::default()
        };
        Self {
            store,
            admin,
            clock,
            settings,
        }
    }

    async fn join(&self, team: &str) -> SessionHandle {
        let mut session = ClientSession::new(
            Arc::new(self.store.clone()),
            Arc::new(StaticContentLoader::with_default(questions())),
            self.settings.clone(),
        )
        .with_clock(self.clock);
        session.authenticate(Some(team), PASSCODE).await.unwrap();
        session.spawn().unwrap()
    }

    fn stored(&self, team: &str) -> serde_json::Value {
        self.store.snapshot(&StorePath::team(team)).unwrap()
    }
}

async fn wait_for(handle: &SessionHandle, matches: impl Fn(&SessionView) -> bool) -> SessionView {
    let mut views = handle.watch();
    timeout(Duration::from_secs(300), async {
        loop {
            let view = views.borrow_and_update().clone();
            if matches(&view) {
                return view;
            }
            views.changed().await.expect("session stopped");
        }
    })
    .await
    .expect("view never matched")
}

fn answering(index: usize) -> impl Fn(&SessionView) -> bool {
    move |view| {
        view.phase == VisibleSessionPhase::Answering
            && view.question.as_ref().is_some_and(|question| question.index == index)
    }
}

fn revealed(view: &SessionView) -> bool {
    view.question.as_ref().is_some_and(|question| question.revealed) && !view.score_pending
}

#[tokio::test(start_paused = true)]
async fn three_teams_are_scored_once_when_time_runs_out() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    let b = room.join("B").await;
    let c = room.join("C").await;
    assert_eq!(a.view().screen, Screen::Standby);

    room.admin.set_waiting_room(true).await.unwrap();
    wait_for(&a, |view| view.screen == Screen::Waiting).await;

    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    for handle in [&a, &b, &c] {
        let view = wait_for(handle, answering(0)).await;
        assert_eq!(view.screen, Screen::Quiz);
        assert_eq!(view.question.unwrap().remaining_seconds, Some(30));
    }

    a.select_option("Rome").await.unwrap();
    a.select_option("Paris").await.unwrap();
    b.select_option("Oslo").await.unwrap();

    let view_a = wait_for(&a, revealed).await;
    let view_b = wait_for(&b, revealed).await;
    let view_c = wait_for(&c, revealed).await;
    assert_eq!(view_a.phase, VisibleSessionPhase::Revealed);
    assert_eq!(view_a.question.unwrap().answer.as_deref(), Some("Paris"));
    assert_eq!((view_a.score, view_b.score, view_c.score), (10, -5, -5));

    // Ticks past the deadline change nothing.
    sleep(Duration::from_secs(10)).await;
    assert_eq!(room.stored("A")["score"], json!(10));
    assert_eq!(room.stored("B")["score"], json!(-5));
    assert_eq!(room.stored("C")["score"], json!(-5));
    assert_eq!(room.stored("C")["lastAnsweredQuestion"], json!(0));

    let err = a.select_option("Rome").await.unwrap_err();
    assert!(matches!(err, SessionError::Selection(SelectionError::NotAnswering)));
}

#[tokio::test(start_paused = true)]
async fn late_join_and_reload_never_score_twice() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();

    sleep(Duration::from_secs(10)).await;
    let a = room.join("A").await;
    let view = a.view();
    assert_eq!(view.phase, VisibleSessionPhase::Answering);
    assert_eq!(view.question.unwrap().remaining_seconds, Some(20));

    a.select_option("Paris").await.unwrap();
    wait_for(&a, revealed).await;
    assert_eq!(room.stored("A")["score"], json!(10));

    a.shutdown().await;
    let writes = room.store.write_count();
    let reloaded = room.join("A").await;
    let view = reloaded.view();
    assert_eq!(view.phase, VisibleSessionPhase::Revealed);
    assert_eq!(view.score, 10);
    assert_eq!(view.question.unwrap().selected.as_deref(), Some("Paris"));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(room.store.write_count(), writes);
    assert_eq!(room.stored("A")["score"], json!(10));
}

#[tokio::test(start_paused = true)]
async fn zero_push_and_local_expiry_reveal_once() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;
    a.select_option("Paris").await.unwrap();

    sleep(Duration::from_millis(29_500)).await;
    room.admin.expire_question().await.unwrap();
    let view = wait_for(&a, revealed).await;
    assert_eq!(view.score, 10);

    // The local deadline passes right after the push.
    sleep(Duration::from_secs(5)).await;
    assert_eq!(room.stored("A")["score"], json!(10));
    assert_eq!(a.view().score, 10);
}

#[tokio::test(start_paused = true)]
async fn next_question_restarts_timing() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;
    wait_for(&a, revealed).await;

    room.admin.publish_question(1).await.unwrap();
    let view = wait_for(&a, answering(1)).await;
    let question = view.question.unwrap();
    assert_eq!(question.remaining_seconds, Some(30));
    assert!(!question.revealed);

    a.select_option("4").await.unwrap();
    let view = wait_for(&a, |view| revealed(view) && view.question.as_ref().is_some_and(|q| q.index == 1)).await;
    assert_eq!(view.score, 5);

    room.admin.publish_question(2).await.unwrap();
    let view = wait_for(&a, |view| view.phase == VisibleSessionPhase::Ended).await;
    assert_eq!(view.screen, Screen::Ended);
}

#[tokio::test(start_paused = true)]
async fn moving_on_early_scores_the_open_question() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    let b = room.join("B").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;
    wait_for(&b, answering(0)).await;
    a.select_option("Paris").await.unwrap();

    sleep(Duration::from_secs(10)).await;
    room.admin.publish_question(1).await.unwrap();
    let view_a = wait_for(&a, answering(1)).await;
    let view_b = wait_for(&b, answering(1)).await;
    assert_eq!((view_a.score, view_b.score), (10, -5));
    assert_eq!(view_a.question.unwrap().remaining_seconds, Some(30));

    for team in ["A", "B"] {
        assert_eq!(room.stored(team)["lastAnsweredQuestion"], json!(0));
    }
    assert_eq!(room.stored("A")["score"], json!(10));
    assert_eq!(room.stored("B")["score"], json!(-5));
}

#[tokio::test(start_paused = true)]
async fn expiry_followed_by_next_question_scores_once() {
    let room = Room::new(TimerMode::PushedCountdown, 30).await;
    let a = room.join("A").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;

    room.admin.expire_question().await.unwrap();
    room.admin.publish_question(1).await.unwrap();
    let view = wait_for(&a, answering(1)).await;
    assert_eq!(view.score, -5);
    assert_eq!(room.stored("A")["lastAnsweredQuestion"], json!(0));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(room.stored("A")["score"], json!(-5));
    let question = a.view().question.unwrap();
    assert_eq!(question.index, 1);
    assert!(!question.revealed);
}

#[tokio::test(start_paused = true)]
async fn promoted_team_plays_its_new_level_from_the_start() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    room.store.put(
        StorePath::team("A"),
        json!({
            "passcode": PASSCODE,
            "score": 20,
            "level": 2,
            "lastAnsweredQuestion": 2,
            "lastAnsweredLevel": 1,
        }),
    );
    room.admin.start_quiz(2).await.unwrap();
    room.admin.publish_question(0).await.unwrap();

    let a = room.join("A").await;
    let view = wait_for(&a, answering(0)).await;
    assert_eq!(view.screen, Screen::LevelQuiz(2));

    a.select_option("Paris").await.unwrap();
    let view = wait_for(&a, revealed).await;
    assert_eq!(view.score, 30);
    let stored = room.stored("A");
    assert_eq!(stored["lastAnsweredLevel"], json!(2));
    assert_eq!(stored["lastAnsweredQuestion"], json!(0));
    assert_eq!(stored["selectedForLevel"], json!(2));
}

#[tokio::test(start_paused = true)]
async fn pushed_countdown_reveals_on_zero() {
    let room = Room::new(TimerMode::PushedCountdown, 3).await;
    let a = room.join("A").await;
    let b = room.join("B").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();

    let view = wait_for(&a, answering(0)).await;
    assert_eq!(view.question.unwrap().remaining_seconds, Some(3));
    a.select_option("Paris").await.unwrap();

    let view = wait_for(&a, |view| {
        view.question.as_ref().is_some_and(|q| q.remaining_seconds == Some(1))
    })
    .await;
    assert!(!view.question.unwrap().revealed);

    assert_eq!(wait_for(&a, revealed).await.score, 10);
    assert_eq!(wait_for(&b, revealed).await.score, -5);
}

#[tokio::test(start_paused = true)]
async fn qualification_takes_over_the_screen() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;

    room.admin
        .set_team_status(
            "A",
            TeamAdminFields {
                qualified: Some(true),
                level: None,
            },
        )
        .await
        .unwrap();
    let view = wait_for(&a, |view| view.screen == Screen::Qualified).await;
    assert_eq!(view.phase, VisibleSessionPhase::Qualified);
    assert!(view.question.is_none());

    room.admin
        .set_team_status(
            "A",
            TeamAdminFields {
                qualified: Some(false),
                level: Some(2),
            },
        )
        .await
        .unwrap();
    let view = wait_for(&a, |view| view.screen == Screen::LevelQuiz(2)).await;
    assert_eq!(view.level, 2);
    assert_eq!(view.question.unwrap().index, 0);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_shows_sync_error_until_the_store_returns() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;

    room.store.set_available(false);
    room.store.drop_subscribers();
    let view = wait_for(&a, |view| view.sync == SyncStatus::Error).await;
    assert_eq!(view.screen, Screen::SyncError);
    assert!(view.message.is_some());

    let err = a.retry().await.unwrap_err();
    assert!(matches!(err, SessionError::StoreUnavailable(_)));

    room.store.set_available(true);
    let view = a.retry().await.unwrap();
    assert_eq!(view.sync, SyncStatus::Synced);
    assert_eq!(view.screen, Screen::Standby);

    // Feeds are live again.
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;
}

#[tokio::test(start_paused = true)]
async fn session_reconnects_on_its_own() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;

    room.store.set_available(false);
    room.store.drop_subscribers();
    wait_for(&a, |view| view.sync == SyncStatus::Error).await;

    sleep(Duration::from_secs(3)).await;
    room.store.set_available(true);
    wait_for(&a, |view| view.sync == SyncStatus::Synced).await;

    room.admin.set_waiting_room(true).await.unwrap();
    wait_for(&a, |view| view.screen == Screen::Waiting).await;
}

#[tokio::test(start_paused = true)]
async fn registry_rejects_bad_credentials_without_writes() {
    let store = MemoryStore::new();
    store.put(StorePath::team("A"), json!({ "passcode": PASSCODE, "score": 0 }));
    let config = AppConfig::default()
        .with_session(SessionSettings {
            option_seed: Some(7),
            ..SessionSettings::default()
        })
        .with_admin_token("secret");
    let state = AppState::new(
        config,
        Arc::new(StaticContentLoader::with_default(questions())),
    );
    assert_eq!(state.config().admin_token(), Some("secret"));

    let err = session_service::open_session(&state, Some("A".into()), PASSCODE.into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));

    state.set_store(Arc::new(store.clone())).await;
    assert!(!state.is_degraded());

    let err = session_service::open_session(&state, Some("A".into()), "000000".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));
    let err = session_service::open_session(&state, None, PASSCODE.into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
    let err = session_service::open_session(&state, Some("Z".into()), PASSCODE.into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert_eq!(store.write_count(), 0);
    assert!(state.sessions().is_empty());

    let view = session_service::open_session(&state, Some("A".into()), PASSCODE.into())
        .await
        .unwrap();
    assert_eq!(view.team_id.as_deref(), Some("A"));
    assert_eq!(view.phase, VisibleSessionPhase::Waiting);
    assert_eq!(state.sessions().len(), 1);

    session_service::open_session(&state, Some("A".into()), PASSCODE.into())
        .await
        .unwrap();
    assert_eq!(state.sessions().len(), 1);

    session_service::close_session(&state, "A").await.unwrap();
    assert!(matches!(
        session_service::current_view(&state, "A").unwrap_err(),
        ServiceError::NotFound(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_scoring_moves_to_the_next_question() {
    let room = Room::new(TimerMode::AbsoluteStart, 30).await;
    let a = room.join("A").await;
    let b = room.join("B").await;
    let c = room.join("C").await;
    room.admin.start_quiz(1).await.unwrap();
    room.admin.publish_question(0).await.unwrap();
    wait_for(&a, answering(0)).await;
    a.select_option("Paris").await.unwrap();
    wait_for(&c, answering(0)).await;
    c.select_option("Paris").await.unwrap();

    wait_for(&a, revealed).await;
    wait_for(&b, revealed).await;
    wait_for(&c, revealed).await;
    assert_eq!(room.stored("A")["score"], json!(10));
    assert_eq!(room.stored("A")["lastAnsweredQuestion"], json!(0));
    assert_eq!(room.stored("B")["score"], json!(-5));
    assert_eq!(room.stored("B")["lastAnsweredQuestion"], json!(0));

    // C drops out while the next question opens.
    c.shutdown().await;
    room.admin.publish_question(1).await.unwrap();
    sleep(Duration::from_secs(4)).await;

    let c = room.join("C").await;
    let view = c.view();
    assert_eq!(view.phase, VisibleSessionPhase::Answering);
    assert_eq!(view.score, 10);
    let question = view.question.unwrap();
    assert_eq!(question.index, 1);
    assert_eq!(question.remaining_seconds, Some(26));
    assert!(!question.revealed);
    assert_eq!(question.selected, None);
    assert_eq!(room.stored("C")["score"], json!(10));
    assert_eq!(room.stored("C")["lastAnsweredQuestion"], json!(0));
}
