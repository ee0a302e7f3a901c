//! Error types for the GoT kernel
//!
//! Startup errors (`RegistryError`, `CycleDetected`, unbound agents) abort
//! before any run begins. `AgentError` is contained to one stage's branch of
//! the DAG. `PipelineError` is the run-level failure surfaced to callers.

use crate::types::{AgentKind, StageId};
use std::fmt;
use std::time::Duration;

/// Registry construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two definitions share an id
    #[error("duplicate stage id: {0}")]
    DuplicateStageId(StageId),

    /// A dependency names a stage that was never declared
    #[error("stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency {
        /// Declaring stage
        stage: StageId,
        /// Unresolved dependency
        dependency: StageId,
    },
}

/// Dependency cycle found by the validator
///
/// `path` starts and ends at the stage that closed the cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle detected: {}", format_path(.path))]
pub struct CycleDetected {
    /// Stages along the cycle
    pub path: Vec<StageId>,
}

fn format_path(path: &[StageId]) -> String {
    path.iter()
        .map(StageId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Cause of a single agent failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// Backing service failed or returned an unusable response
    Service(String),
    /// Backing service refused the request (credentials, quota, not found)
    Rejected(String),
    /// Upstream stage output was missing or had the wrong shape
    MalformedInput(String),
    /// Agent output failed validation
    Validation(String),
    /// Invocation exceeded the stage timeout
    Timeout(Duration),
    /// Agent panicked
    Panicked(String),
    /// Agent observed cancellation and stopped
    Cancelled,
}

impl AgentErrorKind {
    /// Transient causes worth retrying when a retry policy is configured
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Timeout(_))
    }
}

impl fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Service(msg) => write!(f, "service error: {msg}"),
            Self::Rejected(msg) => write!(f, "service rejected request: {msg}"),
            Self::MalformedInput(msg) => write!(f, "malformed upstream data: {msg}"),
            Self::Validation(msg) => write!(f, "validation failed: {msg}"),
            Self::Timeout(after) => write!(f, "timed out after {}ms", after.as_millis()),
            Self::Panicked(msg) => write!(f, "agent panicked: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Failure of one agent invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage {stage_id} failed: {cause}")]
pub struct AgentError {
    /// Stage whose agent failed
    pub stage_id: StageId,
    /// What went wrong
    pub cause: AgentErrorKind,
}

impl AgentError {
    /// Create an agent error
    #[inline]
    #[must_use]
    pub fn new(stage_id: StageId, cause: AgentErrorKind) -> Self {
        Self { stage_id, cause }
    }

    /// Timeout for a stage
    #[inline]
    #[must_use]
    pub fn timeout(stage_id: StageId, after: Duration) -> Self {
        Self::new(stage_id, AgentErrorKind::Timeout(after))
    }

    /// Check if error is a timeout
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, AgentErrorKind::Timeout(_))
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.cause.is_retryable()
    }
}

/// Illegal stage status transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not permitted from the current status
    #[error("illegal transition for stage {stage}: {from} -> {to}")]
    IllegalTransition {
        /// Stage being transitioned
        stage: StageId,
        /// Current status
        from: crate::types::StageStatus,
        /// Requested status
        to: crate::types::StageStatus,
    },
}

/// Main run-level error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Registry construction failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Dependency graph is cyclic
    #[error(transparent)]
    Cycle(#[from] CycleDetected),

    /// A stage's agent kind has no bound agent
    #[error("no agent bound for stage {stage} (kind {kind})")]
    UnboundAgent {
        /// Stage lacking an agent
        stage: StageId,
        /// Kind that needs an agent
        kind: AgentKind,
    },

    /// Input could not be resolved; no stage was started
    #[error("input unavailable: {0}")]
    InputUnavailable(String),

    /// Stages required by the aggregator did not complete
    #[error("incomplete aggregation, missing stages: {}", format_path(.missing))]
    IncompleteAggregation {
        /// Required stages not in `Completed`
        missing: Vec<StageId>,
    },

    /// Aggregator rejected the completed outputs
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    /// Run was cancelled
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Errors that must be fixed by configuration before any run
    #[inline]
    #[must_use]
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::Registry(_) | Self::Cycle(_) | Self::UnboundAgent { .. }
        )
    }

    /// Check if starting a fresh run might succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InputUnavailable(_) | Self::IncompleteAggregation { .. }
        )
    }

    /// Incomplete aggregation with the given missing stages
    #[must_use]
    pub fn incomplete(missing: impl IntoIterator<Item = StageId>) -> Self {
        Self::IncompleteAggregation {
            missing: missing.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_display_shows_path() {
        let err = CycleDetected {
            path: vec!["A".into(), "B".into(), "A".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: A -> B -> A");
    }

    #[test]
    fn startup_errors_are_classified() {
        let dup = PipelineError::from(RegistryError::DuplicateStageId("A".into()));
        assert!(dup.is_startup());
        assert!(!dup.is_retryable());

        let missing = PipelineError::incomplete(["B".into()]);
        assert!(!missing.is_startup());
        assert!(missing.is_retryable());
        assert!(missing.to_string().contains("missing stages: B"));
    }

    #[test]
    fn agent_error_retryability() {
        let timeout = AgentError::timeout("A".into(), Duration::from_secs(1));
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());

        let rejected = AgentErrorKind::Rejected("401".into());
        assert!(!rejected.is_retryable());

        let invalid = AgentError::new("A".into(), AgentErrorKind::Validation("bad".into()));
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.to_string(), "stage A failed: validation failed: bad");
    }
}
