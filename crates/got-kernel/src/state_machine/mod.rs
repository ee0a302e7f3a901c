//! Stage status state machine
//!
//! ```text
//! Pending --> Running --> Completed
//!    |           |------> Failed
//!    |           '------> Cancelled
//!    |------> Blocked
//!    '------> Cancelled
//! ```

use crate::error::StateMachineError;
use crate::types::{StageId, StageStatus};

/// Validates a status transition for a stage.
///
/// Illegal transitions panic with the `strict-debug` feature; otherwise an
/// error is returned so the scheduler can log and skip.
pub fn validate_transition(
    stage: &StageId,
    from: StageStatus,
    to: StageStatus,
) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal state transition attempted for {stage}: {from:?} -> {to:?}");

        Err(StateMachineError::IllegalTransition {
            stage: stage.clone(),
            from,
            to,
        })
    }
}

/// Statuses reachable in one step from `from`
pub fn allowed_transitions(from: StageStatus) -> Vec<StageStatus> {
    use StageStatus::*;
    match from {
        Pending => vec![Running, Blocked, Cancelled],
        Running => vec![Completed, Failed, Cancelled],
        Completed | Failed | Blocked | Cancelled => vec![],
    }
}

fn allowed(from: StageStatus, to: StageStatus) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
