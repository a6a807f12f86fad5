use thiserror::Error;
use uuid::Uuid;

/// High-level phases a participant session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No verified team yet; the passcode screen is shown.
    Unauthenticated,
    /// Credentials are being checked against the store.
    Authenticating,
    /// The team is verified and follows the round.
    Verified(VerifiedPhase),
}

/// Fine-grained phase once the team is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedPhase {
    /// No question is open for this team.
    Waiting,
    /// A question is open and selections are accepted.
    Answering,
    /// The answer of the active question has been revealed.
    Revealed,
    /// The team qualified for the next stage.
    Qualified,
    /// Every question of the set has been played.
    Ended,
}

/// Events that can be applied to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credentials matched the stored team record.
    Authenticated,
    /// Nothing to answer right now.
    Hold,
    /// A new question (or a restarted one) opened for answering.
    OpenQuestion,
    /// Time is up on the active question.
    Reveal,
    /// The admin marked the team as qualified.
    Qualify,
    /// The round moved past the last question.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionPhase,
    /// Phase the state machine will transition to.
    pub to: SessionPhase,
    /// Event that triggered this transition.
    pub event: SessionEvent,
}

/// Session state machine. Asynchronous steps plan a transition, do their I/O,
/// then apply or abort it, so a failed step leaves the phase untouched.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Unauthenticated,
            pending: None,
        }
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observable phase. A pending authentication reports [`SessionPhase::Authenticating`].
    pub fn phase(&self) -> SessionPhase {
        match &self.pending {
            Some(plan) if plan.event == SessionEvent::Authenticated => {
                SessionPhase::Authenticating
            }
            _ => self.phase,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.phase, SessionPhase::Verified(_))
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, returning the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        self.phase = plan.to;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one step, for transitions that need no I/O.
    /// Re-entering the current phase is a no-op returning `Ok(None)`.
    pub fn transition(&mut self, event: SessionEvent) -> Result<Option<SessionPhase>, PlanError> {
        let target = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;
        if target == self.phase && event != SessionEvent::OpenQuestion {
            return Ok(None);
        }
        let plan = self.plan(event)?;
        // The plan was created against the current phase a moment ago.
        match self.apply(plan.id) {
            Ok(phase) => Ok(Some(phase)),
            Err(_) => Ok(None),
        }
    }

    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        use SessionEvent as E;
        use SessionPhase as P;
        use VerifiedPhase as V;

        let next = match (self.phase, event) {
            (P::Unauthenticated, E::Authenticated) => P::Verified(V::Waiting),
            (P::Verified(_), E::Hold) => P::Verified(V::Waiting),
            (P::Verified(_), E::Qualify) => P::Verified(V::Qualified),
            (P::Verified(V::Qualified), E::OpenQuestion | E::Finish) => {
                return Err(InvalidTransition {
                    from: self.phase,
                    event,
                });
            }
            (P::Verified(_), E::OpenQuestion) => P::Verified(V::Answering),
            (P::Verified(V::Answering), E::Reveal) => P::Verified(V::Revealed),
            (P::Verified(_), E::Finish) => P::Verified(V::Ended),
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_unauthenticated() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);
        assert!(!sm.is_verified());
    }

    #[test]
    fn full_question_cycle() {
        let mut sm = SessionStateMachine::new();

        assert_eq!(
            apply(&mut sm, SessionEvent::Authenticated),
            SessionPhase::Verified(VerifiedPhase::Waiting)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::OpenQuestion),
            SessionPhase::Verified(VerifiedPhase::Answering)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::Reveal),
            SessionPhase::Verified(VerifiedPhase::Revealed)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::OpenQuestion),
            SessionPhase::Verified(VerifiedPhase::Answering)
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::Finish),
            SessionPhase::Verified(VerifiedPhase::Ended)
        );
    }

    #[test]
    fn pending_authentication_is_observable() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Authenticated).unwrap();
        assert_eq!(sm.phase(), SessionPhase::Authenticating);

        sm.abort(plan.id).unwrap();
        assert_eq!(sm.phase(), SessionPhase::Unauthenticated);
        assert!(sm.apply(plan.id).is_err());
    }

    #[test]
    fn reveal_requires_an_open_question() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Authenticated);

        let err = sm.plan(SessionEvent::Reveal).unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => {
                assert_eq!(invalid.from, SessionPhase::Verified(VerifiedPhase::Waiting));
                assert_eq!(invalid.event, SessionEvent::Reveal);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn qualified_teams_do_not_answer() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Authenticated);
        apply(&mut sm, SessionEvent::Qualify);

        assert!(sm.plan(SessionEvent::OpenQuestion).is_err());
        assert_eq!(
            apply(&mut sm, SessionEvent::Hold),
            SessionPhase::Verified(VerifiedPhase::Waiting)
        );
    }

    #[test]
    fn nothing_applies_before_authentication() {
        let mut sm = SessionStateMachine::new();
        for event in [
            SessionEvent::Hold,
            SessionEvent::OpenQuestion,
            SessionEvent::Reveal,
            SessionEvent::Qualify,
            SessionEvent::Finish,
        ] {
            assert!(sm.plan(event).is_err(), "{event:?} accepted");
        }
    }

    #[test]
    fn second_plan_is_rejected_while_pending() {
        let mut sm = SessionStateMachine::new();
        sm.plan(SessionEvent::Authenticated).unwrap();
        assert_eq!(
            sm.plan(SessionEvent::Authenticated).unwrap_err(),
            PlanError::AlreadyPending
        );
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Authenticated).unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert_eq!(
            sm.apply(plan.id).unwrap(),
            SessionPhase::Verified(VerifiedPhase::Waiting)
        );
    }

    #[test]
    fn transition_skips_reentering_the_same_phase() {
        let mut sm = SessionStateMachine::new();
        apply(&mut sm, SessionEvent::Authenticated);
        assert_eq!(sm.transition(SessionEvent::Hold).unwrap(), None);
        assert_eq!(sm.phase(), SessionPhase::Verified(VerifiedPhase::Waiting));
        assert_eq!(
            sm.transition(SessionEvent::OpenQuestion).unwrap(),
            Some(SessionPhase::Verified(VerifiedPhase::Answering))
        );
    }

    #[test]
    fn abort_clears_pending() {
        let mut sm = SessionStateMachine::new();
        let plan = sm.plan(SessionEvent::Authenticated).unwrap();
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
    }
}
