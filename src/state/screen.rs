//! Screen selection as a declarative, first-match-wins table.

use serde::Serialize;
use utoipa::ToSchema;

/// Screens a participant session can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", content = "level", rename_all = "snake_case")]
pub enum Screen {
    /// Passcode entry, before verification.
    Passcode,
    /// Verified, waiting room still closed.
    Standby,
    /// Waiting room open, quiz not started.
    Waiting,
    /// Quiz running.
    Quiz,
    /// Waiting screen dedicated to a staged level.
    LevelWaiting(u32),
    /// Quiz screen dedicated to a staged level.
    LevelQuiz(u32),
    /// The team qualified for the next stage.
    Qualified,
    /// Every question of the set has been played.
    Ended,
    /// Store unreachable; retry possible.
    SyncError,
    /// Neither the level content nor the default set could be loaded.
    ContentUnavailable,
}

impl Screen {
    /// Whether this screen shows the active question.
    pub fn shows_question(self) -> bool {
        matches!(self, Screen::Quiz | Screen::LevelQuiz(_))
    }
}

/// Authoritative inputs the screen is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInputs {
    pub level: u32,
    pub qualified: bool,
    pub quiz_started: bool,
    pub waiting_room_open: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelMatch {
    Any,
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Fixed(Screen),
    LevelWaiting,
    LevelQuiz,
}

#[derive(Debug, Clone, Copy)]
struct ScreenRule {
    level: LevelMatch,
    qualified: Option<bool>,
    quiz_started: Option<bool>,
    waiting_room_open: Option<bool>,
    outcome: Outcome,
}

const fn rule(
    level: LevelMatch,
    qualified: Option<bool>,
    quiz_started: Option<bool>,
    waiting_room_open: Option<bool>,
    outcome: Outcome,
) -> ScreenRule {
    ScreenRule {
        level,
        qualified,
        quiz_started,
        waiting_room_open,
        outcome,
    }
}

/// Qualification outranks level, which outranks the started/waiting-room flags.
/// The final row matches everything so [`ScreenTable::decide`] is total.
const RULES: &[ScreenRule] = &[
    rule(LevelMatch::Any, Some(true), None, None, Outcome::Fixed(Screen::Qualified)),
    rule(LevelMatch::Staged, None, Some(true), None, Outcome::LevelQuiz),
    rule(LevelMatch::Staged, None, Some(false), None, Outcome::LevelWaiting),
    rule(LevelMatch::Any, None, Some(true), None, Outcome::Fixed(Screen::Quiz)),
    rule(LevelMatch::Any, None, None, Some(true), Outcome::Fixed(Screen::Waiting)),
    rule(LevelMatch::Any, None, None, None, Outcome::Fixed(Screen::Standby)),
];

/// Screen table parameterised by the levels that get dedicated screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenTable {
    staged_levels: Vec<u32>,
}

impl Default for ScreenTable {
    fn default() -> Self {
        Self::new(vec![2, 3])
    }
}

impl ScreenTable {
    pub fn new(staged_levels: Vec<u32>) -> Self {
        Self { staged_levels }
    }

    /// Pure, total screen decision over the whole authoritative snapshot.
    pub fn decide(&self, inputs: ScreenInputs) -> Screen {
        RULES
            .iter()
            .find(|rule| self.matches(rule, inputs))
            .map_or(Screen::Standby, |rule| match rule.outcome {
                Outcome::Fixed(screen) => screen,
                Outcome::LevelWaiting => Screen::LevelWaiting(inputs.level),
                Outcome::LevelQuiz => Screen::LevelQuiz(inputs.level),
            })
    }

    fn matches(&self, rule: &ScreenRule, inputs: ScreenInputs) -> bool {
        let level = match rule.level {
            LevelMatch::Any => true,
            LevelMatch::Staged => self.staged_levels.contains(&inputs.level),
        };
        level
            && flag_matches(rule.qualified, inputs.qualified)
            && flag_matches(rule.quiz_started, inputs.quiz_started)
            && flag_matches(rule.waiting_room_open, inputs.waiting_room_open)
    }
}

fn flag_matches(expected: Option<bool>, actual: bool) -> bool {
    expected.is_none_or(|expected| expected == actual)
}

/// Decide with the default staged levels.
pub fn decide(level: u32, qualified: bool, quiz_started: bool, waiting_room_open: bool) -> Screen {
    ScreenTable::default().decide(ScreenInputs {
        level,
        qualified,
        quiz_started,
        waiting_room_open,
    })
}
