//! Timer reconciliation: how much time is left on the active question.

use std::time::{Duration, SystemTime};

use serde::Deserialize;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::dao::models::RoundState;

/// Question duration used when the configuration does not set one.
pub const DEFAULT_QUESTION_DURATION: Duration = Duration::from_secs(30);
/// Period of the local tick in absolute-start mode.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Where remaining time comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    /// The admin publishes a start instant; every session counts down locally.
    #[default]
    AbsoluteStart,
    /// The admin republishes `timeLeft` every second; sessions mirror it.
    PushedCountdown,
}

/// `max(duration - floor((now - start) / 1s), 0)`; `now` before `start` counts as no time elapsed.
pub fn remaining_seconds(duration: Duration, start: SystemTime, now: SystemTime) -> u32 {
    let elapsed = now
        .duration_since(start)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    let remaining = duration.as_secs().saturating_sub(elapsed);
    u32::try_from(remaining).unwrap_or(u32::MAX)
}

/// Wall-clock reading anchored once and advanced by Tokio's monotonic clock,
/// so it never goes backwards and follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall: SystemTime,
    mono: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self::anchored_at(SystemTime::now())
    }

    pub fn anchored_at(wall: SystemTime) -> Self {
        Self {
            wall,
            mono: Instant::now(),
        }
    }

    pub fn now(&self) -> SystemTime {
        self.wall + self.mono.elapsed()
    }
}

/// One-second tick schedule bound to a single question.
#[derive(Debug)]
pub struct TickSchedule {
    question: usize,
    interval: Interval,
}

impl TickSchedule {
    /// First tick one period from now.
    pub fn every_second(question: usize) -> Self {
        let mut interval = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { question, interval }
    }

    pub fn question(&self) -> usize {
        self.question
    }

    /// Wait for the next tick; yields the question the schedule belongs to.
    pub async fn tick(&mut self) -> usize {
        self.interval.tick().await;
        self.question
    }

    /// Stop ticking.
    pub fn cancel(self) {
        debug!(question = self.question, "tick schedule cancelled");
    }
}

/// What an authoritative update meant for the active question's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSignal {
    /// Nothing usable changed.
    Unchanged,
    /// Fresh timing arrived; any local schedule must be (re)started.
    Restarted,
    /// Mirrored countdown moved.
    Updated,
}

/// Timer state for the active question.
#[derive(Debug, Clone)]
pub struct QuestionTimer {
    mode: TimerMode,
    duration: Duration,
    question: usize,
    start: Option<SystemTime>,
    stale_start: Option<SystemTime>,
    remaining: Option<u32>,
    seen_nonzero: bool,
    trust_zero: bool,
}

impl QuestionTimer {
    /// Timer for a question reached on restore or late join: whatever timing
    /// data the store holds belongs to this question.
    pub fn restored(mode: TimerMode, duration: Duration, question: usize) -> Self {
        Self {
            mode,
            duration,
            question,
            start: None,
            stale_start: None,
            remaining: None,
            seen_nonzero: false,
            trust_zero: true,
        }
    }

    /// Timer for a question reached live. Timing left over from the previous
    /// question (`previous_start`, or a zero countdown) is ignored until fresh
    /// data arrives.
    pub fn live(
        mode: TimerMode,
        duration: Duration,
        question: usize,
        previous_start: Option<SystemTime>,
    ) -> Self {
        Self {
            stale_start: previous_start,
            trust_zero: false,
            ..Self::restored(mode, duration, question)
        }
    }

    pub fn question(&self) -> usize {
        self.question
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    /// Start instant accepted for this question.
    pub fn start(&self) -> Option<SystemTime> {
        self.start
    }

    /// Seconds left; `None` until timing data for this question arrived.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn expired(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Whether this timer needs a local tick schedule.
    pub fn needs_ticks(&self) -> bool {
        self.mode == TimerMode::AbsoluteStart && self.remaining.is_some_and(|left| left > 0)
    }

    /// Fold the timing fields of an authoritative snapshot into the timer.
    pub fn observe(&mut self, round: &RoundState, now: SystemTime) -> TimerSignal {
        match self.mode {
            TimerMode::AbsoluteStart => {
                let mut signal = TimerSignal::Unchanged;
                if let Some(start) = round.question_start_time
                    && self.stale_start != Some(start)
                    && self.start != Some(start)
                {
                    self.stale_start = None;
                    self.start = Some(start);
                    self.remaining = Some(remaining_seconds(self.duration, start, now));
                    signal = TimerSignal::Restarted;
                }
                // A zero push ends the question early once timing for it is known.
                let trusted = self.trust_zero || self.start.is_some();
                if round.countdown() == Some(0) && trusted && !self.expired() {
                    self.remaining = Some(0);
                    if signal == TimerSignal::Unchanged {
                        signal = TimerSignal::Updated;
                    }
                }
                signal
            }
            TimerMode::PushedCountdown => {
                let Some(left) = round.countdown() else {
                    return TimerSignal::Unchanged;
                };
                if left == 0 && !self.seen_nonzero && !self.trust_zero {
                    return TimerSignal::Unchanged;
                }
                self.seen_nonzero |= left > 0;
                if self.remaining == Some(left) {
                    return TimerSignal::Unchanged;
                }
                let first = self.remaining.is_none();
                self.remaining = Some(left);
                if first {
                    TimerSignal::Restarted
                } else {
                    TimerSignal::Updated
                }
            }
        }
    }

    /// Recompute remaining time on a local tick. Countdown mode does not extrapolate.
    pub fn tick(&mut self, now: SystemTime) -> Option<u32> {
        if let (TimerMode::AbsoluteStart, Some(start)) = (self.mode, self.start) {
            let left = remaining_seconds(self.duration, start, now);
            // Never move back up within a question.
            let left = self.remaining.map_or(left, |previous| previous.min(left));
            self.remaining = Some(left);
        }
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use rstest::rstest;

    use super::*;

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    fn round_started_at(start: SystemTime) -> RoundState {
        RoundState {
            quiz_started: true,
            current_question_index: Some(0),
            question_start_time: Some(start),
            ..RoundState::default()
        }
    }

    fn round_with_countdown(left: i64) -> RoundState {
        RoundState {
            quiz_started: true,
            current_question_index: Some(1),
            time_left: Some(left),
            ..RoundState::default()
        }
    }

    #[rstest]
    #[case(0, 30)]
    #[case(1, 29)]
    #[case(29, 1)]
    #[case(30, 0)]
    #[case(45, 0)]
    fn remaining_follows_whole_elapsed_seconds(#[case] elapsed: u64, #[case] expected: u32) {
        assert_eq!(
            remaining_seconds(DEFAULT_QUESTION_DURATION, at(0), at(elapsed)),
            expected
        );
    }

    #[test]
    fn partial_seconds_round_down_elapsed() {
        let now = at(2) + Duration::from_millis(999);
        assert_eq!(remaining_seconds(DEFAULT_QUESTION_DURATION, at(0), now), 28);
    }

    #[test]
    fn clock_before_start_counts_as_no_elapsed_time() {
        assert_eq!(remaining_seconds(DEFAULT_QUESTION_DURATION, at(10), at(3)), 30);
    }

    #[test]
    fn remaining_is_non_increasing_and_bottoms_at_zero() {
        let start = at(0);
        let mut previous = u32::MAX;
        for millis in (0..45_000).step_by(250) {
            let now = start + Duration::from_millis(millis);
            let left = remaining_seconds(DEFAULT_QUESTION_DURATION, start, now);
            assert!(left <= previous);
            previous = left;
        }
        assert_eq!(previous, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn session_clock_follows_paused_time() {
        let clock = SessionClock::anchored_at(at(0));
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(clock.now(), at(7));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_schedule_fires_once_per_second() {
        let mut schedule = TickSchedule::every_second(4);
        let begin = Instant::now();
        assert_eq!(schedule.tick().await, 4);
        assert_eq!(begin.elapsed(), TICK_PERIOD);
        schedule.tick().await;
        assert_eq!(begin.elapsed(), TICK_PERIOD * 2);
    }

    #[test]
    fn live_timer_ignores_previous_start_instant() {
        let mut timer =
            QuestionTimer::live(TimerMode::AbsoluteStart, DEFAULT_QUESTION_DURATION, 1, Some(at(0)));
        assert_eq!(
            timer.observe(&round_started_at(at(0)), at(40)),
            TimerSignal::Unchanged
        );
        assert_eq!(timer.remaining(), None);

        assert_eq!(
            timer.observe(&round_started_at(at(41)), at(41)),
            TimerSignal::Restarted
        );
        assert_eq!(timer.remaining(), Some(30));
        assert!(timer.needs_ticks());
    }

    #[test]
    fn restored_timer_trusts_stored_start() {
        let mut timer =
            QuestionTimer::restored(TimerMode::AbsoluteStart, DEFAULT_QUESTION_DURATION, 0);
        assert_eq!(
            timer.observe(&round_started_at(at(0)), at(40)),
            TimerSignal::Restarted
        );
        assert!(timer.expired());
        assert!(!timer.needs_ticks());
    }

    #[test]
    fn changed_start_restarts_the_timer() {
        let mut timer =
            QuestionTimer::restored(TimerMode::AbsoluteStart, DEFAULT_QUESTION_DURATION, 0);
        timer.observe(&round_started_at(at(0)), at(10));
        assert_eq!(timer.remaining(), Some(20));
        assert_eq!(
            timer.observe(&round_started_at(at(0)), at(11)),
            TimerSignal::Unchanged
        );
        assert_eq!(
            timer.observe(&round_started_at(at(10)), at(11)),
            TimerSignal::Restarted
        );
        assert_eq!(timer.remaining(), Some(29));
    }

    #[test]
    fn zero_push_ends_absolute_timer_early() {
        let mut timer =
            QuestionTimer::live(TimerMode::AbsoluteStart, DEFAULT_QUESTION_DURATION, 0, None);
        timer.observe(&round_started_at(at(0)), at(3));
        let mut round = round_started_at(at(0));
        round.time_left = Some(0);
        assert_eq!(timer.observe(&round, at(4)), TimerSignal::Updated);
        assert!(timer.expired());
        assert_eq!(timer.observe(&round, at(5)), TimerSignal::Unchanged);
        assert_eq!(timer.tick(at(6)), Some(0));
    }

    #[test]
    fn tick_never_moves_remaining_up() {
        let mut timer =
            QuestionTimer::restored(TimerMode::AbsoluteStart, DEFAULT_QUESTION_DURATION, 0);
        timer.observe(&round_started_at(at(0)), at(5));
        assert_eq!(timer.tick(at(6)), Some(24));
        assert_eq!(timer.tick(at(2)), Some(24));
        assert_eq!(timer.tick(at(31)), Some(0));
    }

    #[test]
    fn countdown_mirrors_pushed_values() {
        let mut timer =
            QuestionTimer::live(TimerMode::PushedCountdown, DEFAULT_QUESTION_DURATION, 1, None);
        assert_eq!(
            timer.observe(&round_with_countdown(30), at(0)),
            TimerSignal::Restarted
        );
        assert_eq!(
            timer.observe(&round_with_countdown(29), at(0)),
            TimerSignal::Updated
        );
        assert_eq!(timer.remaining(), Some(29));
        assert_eq!(timer.tick(at(100)), Some(29));
        assert!(!timer.needs_ticks());
    }

    #[test]
    fn live_countdown_ignores_leftover_zero() {
        let mut timer =
            QuestionTimer::live(TimerMode::PushedCountdown, DEFAULT_QUESTION_DURATION, 1, None);
        assert_eq!(
            timer.observe(&round_with_countdown(0), at(0)),
            TimerSignal::Unchanged
        );
        timer.observe(&round_with_countdown(2), at(0));
        timer.observe(&round_with_countdown(0), at(0));
        assert!(timer.expired());
    }

    #[test]
    fn restored_countdown_trusts_zero() {
        let mut timer =
            QuestionTimer::restored(TimerMode::PushedCountdown, DEFAULT_QUESTION_DURATION, 1);
        timer.observe(&round_with_countdown(-3), at(0));
        assert!(timer.expired());
    }
}
