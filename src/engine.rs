//! Transition engine for the fixed three level approval chain.
//!
//! A decision is applied in two phases. [`prepare`] works on a copy of the
//! request: it performs the reject-then-retry reset when needed, locates the
//! pending step and checks the decision against the transition table. The
//! caller may then authorize the actor against [`PreparedTransition::step`]
//! before [`PreparedTransition::commit`] stamps the step and moves the request.
//! Nothing touches the caller's request until commit, so a refused decision
//! leaves it exactly as it was.
use chrono::Utc;
use tracing::{debug, error};

use super::error::TransitionError;
use super::request::{ApprovalRequest, ApprovalStep, RequestStatus, StepStatus};
use super::types::TimeStamp;

use RequestStatus::*;

/// (current status, pending level) -> statuses a decision may move to.
const TRANSITIONS: [(RequestStatus, u32, &[RequestStatus]); 3] = [
    (Pending, 1, &[InReview, Rejected]),
    (InReview, 2, &[Approved, Rejected]),
    (Approved, 3, &[Completed, Rejected]),
];

pub fn legal_transitions(status: RequestStatus, level: u32) -> &'static [RequestStatus] {
    TRANSITIONS
        .iter()
        .find(|(s, l, _)| *s == status && *l == level)
        .map(|(_, _, next)| *next)
        .unwrap_or(&[])
}

/// What a committed decision did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub request_id: String,
    pub level: u32,
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub reset: bool,
}

#[derive(Debug, Clone)]
pub struct PreparedTransition {
    working: ApprovalRequest,
    transition: Transition,
    // index into `working.steps`, which is not touched again before commit
    step_index: usize,
}

impl PreparedTransition {
    /// The step the decision will act on, after any reset.
    pub fn step(&self) -> &ApprovalStep {
        &self.working.steps[self.step_index]
    }

    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    pub fn commit(
        mut self,
        approver: &str,
        notes: Option<String>,
        at: TimeStamp<Utc>,
    ) -> (ApprovalRequest, Transition) {
        let decision = self.transition.to;

        if let Some(step) = self.working.steps.get_mut(self.step_index) {
            step.status = if decision == Rejected {
                StepStatus::Rejected
            } else {
                StepStatus::Approved
            };
            step.approver = Some(approver.to_string());
            step.approved_at = Some(at.clone());
            step.notes = notes;
        }

        let request = &mut self.working;
        request.status = decision;
        match decision {
            Rejected => {
                request.completed_at = Some(at);
                request.next_approval_level = 1;
            }
            Completed => request.completed_at = Some(at),
            _ => request.next_approval_level += 1,
        }

        (self.working, self.transition)
    }
}

/// Validates `decision` against `request` without modifying it.
pub fn prepare(
    request: &ApprovalRequest,
    decision: RequestStatus,
) -> Result<PreparedTransition, TransitionError> {
    let mut working = request.clone();
    let mut reset = false;

    if working.status == Rejected {
        if decision == Rejected {
            return Err(TransitionError::IllegalTransition {
                from: Rejected,
                level: working.next_approval_level,
                to: Rejected,
            });
        }
        working.reset();
        reset = true;
    }

    let step_index = working
        .pending_step_index()
        .ok_or(TransitionError::NoPendingStep)?;
    let step = &working.steps[step_index];

    if working.next_approval_level != step.level {
        error!(
            request_id = %working.id,
            expected = working.next_approval_level,
            found = step.level,
            "approval level out of step with pending step"
        );
        return Err(TransitionError::LevelInconsistency {
            expected: working.next_approval_level,
            found: step.level,
        });
    }

    let level = step.level;
    if !legal_transitions(working.status, level).contains(&decision) {
        return Err(TransitionError::IllegalTransition {
            from: working.status,
            level,
            to: decision,
        });
    }
    debug!(request_id = %working.id, level, from = %working.status, to = %decision, reset, "transition planned");

    let transition = Transition {
        request_id: working.id.clone(),
        level,
        from: request.status,
        to: decision,
        reset,
    };
    Ok(PreparedTransition {
        working,
        transition,
        step_index,
    })
}

/// Prepare and commit in one go, for callers that authorize elsewhere.
pub fn apply(
    request: &ApprovalRequest,
    decision: RequestStatus,
    approver: &str,
    notes: Option<String>,
    at: TimeStamp<Utc>,
) -> Result<(ApprovalRequest, Transition), TransitionError> {
    Ok(prepare(request, decision)?.commit(approver, notes, at))
}
