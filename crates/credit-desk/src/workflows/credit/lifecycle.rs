//! Request lifecycle: Pending -> Evaluating -> {Approved, Rejected, Returned}.
//!
//! Every function here is pure. Services apply the resulting state inside the same
//! storage transaction as the record that caused it.

use super::domain::{RequestId, RequestState, VerdictOutcome, VerdictRecord};

/// Events that move a request between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    LookupAttached,
    VerdictRecorded(VerdictOutcome),
}

/// State conflicts surfaced to callers as 409-class failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleConflict {
    #[error("cannot edit once evaluation has started (request is {})", .0.label())]
    EvaluationStarted(RequestState),
    #[error("request is already decided ({})", .0.label())]
    AlreadyDecided(RequestState),
    #[error("request {0} already has a verdict")]
    VerdictExists(RequestId),
    #[error("{0}")]
    Duplicate(String),
}

impl RequestState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Approved | RequestState::Rejected | RequestState::Returned
        )
    }

    pub const fn accepts_lookup(self) -> bool {
        matches!(self, RequestState::Pending | RequestState::Evaluating)
    }

    pub const fn is_editable(self) -> bool {
        matches!(self, RequestState::Pending)
    }
}

/// State a verdict outcome maps to. The outcome value is used directly as the new state.
pub const fn outcome_state(outcome: VerdictOutcome) -> RequestState {
    match outcome {
        VerdictOutcome::Approved => RequestState::Approved,
        VerdictOutcome::Rejected => RequestState::Rejected,
        VerdictOutcome::Returned => RequestState::Returned,
    }
}

/// The request state is a projection of its verdict, re-applied on every verdict write.
pub fn project_state(verdict: &VerdictRecord) -> RequestState {
    outcome_state(verdict.outcome)
}

pub fn transition(
    from: RequestState,
    event: LifecycleEvent,
) -> Result<RequestState, LifecycleConflict> {
    if from.is_terminal() {
        return Err(LifecycleConflict::AlreadyDecided(from));
    }

    match event {
        LifecycleEvent::LookupAttached => Ok(RequestState::Evaluating),
        LifecycleEvent::VerdictRecorded(outcome) => Ok(outcome_state(outcome)),
    }
}

pub fn ensure_editable(state: RequestState) -> Result<(), LifecycleConflict> {
    if state.is_editable() {
        Ok(())
    } else {
        Err(LifecycleConflict::EvaluationStarted(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_move_open_requests_to_evaluating() {
        assert_eq!(
            transition(RequestState::Pending, LifecycleEvent::LookupAttached),
            Ok(RequestState::Evaluating)
        );
        assert_eq!(
            transition(RequestState::Evaluating, LifecycleEvent::LookupAttached),
            Ok(RequestState::Evaluating)
        );
    }

    #[test]
    fn decided_requests_reject_further_events() {
        for state in [
            RequestState::Approved,
            RequestState::Rejected,
            RequestState::Returned,
        ] {
            assert_eq!(
                transition(state, LifecycleEvent::LookupAttached),
                Err(LifecycleConflict::AlreadyDecided(state))
            );
            assert_eq!(
                transition(
                    state,
                    LifecycleEvent::VerdictRecorded(VerdictOutcome::Approved)
                ),
                Err(LifecycleConflict::AlreadyDecided(state))
            );
        }
    }

    #[test]
    fn verdicts_map_directly_to_states() {
        assert_eq!(
            transition(
                RequestState::Pending,
                LifecycleEvent::VerdictRecorded(VerdictOutcome::Returned)
            ),
            Ok(RequestState::Returned)
        );
        assert_eq!(
            outcome_state(VerdictOutcome::Approved),
            RequestState::Approved
        );
        assert_eq!(
            outcome_state(VerdictOutcome::Rejected),
            RequestState::Rejected
        );
    }

    #[test]
    fn only_pending_requests_are_editable() {
        assert!(ensure_editable(RequestState::Pending).is_ok());
        for state in [
            RequestState::Evaluating,
            RequestState::Approved,
            RequestState::Rejected,
            RequestState::Returned,
        ] {
            assert_eq!(
                ensure_editable(state),
                Err(LifecycleConflict::EvaluationStarted(state))
            );
        }
    }
}
