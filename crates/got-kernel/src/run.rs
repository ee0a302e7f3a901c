//! Handle to one in-flight pipeline run

use crate::error::PipelineError;
use crate::events::{EventSubscription, RunEventLog, StateChangeEvent};
use crate::types::{RunId, StageExecutionState, StageId, StageStatus};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Per-stage state of a run, in registration order
pub(crate) type SharedStates = Arc<RwLock<IndexMap<StageId, StageExecutionState>>>;

/// Terminal outcome of a run
#[derive(Debug)]
pub enum RunOutcome<R> {
    /// Aggregation produced a report
    Succeeded(Arc<R>),
    /// The run finished without a report
    Failed(PipelineError),
    /// The run was cancelled
    Cancelled,
}

impl<R> Clone for RunOutcome<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Succeeded(report) => Self::Succeeded(Arc::clone(report)),
            Self::Failed(err) => Self::Failed(err.clone()),
            Self::Cancelled => Self::Cancelled,
        }
    }
}

impl<R> RunOutcome<R> {
    /// True for `Succeeded`
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Report, if the run succeeded
    #[must_use]
    pub fn report(&self) -> Option<&R> {
        match self {
            Self::Succeeded(report) => Some(report),
            _ => None,
        }
    }

    /// Convert into a `Result`, mapping cancellation to `PipelineError::Cancelled`
    ///
    /// # Errors
    /// Returns the run's failure cause.
    pub fn into_result(self) -> Result<Arc<R>, PipelineError> {
        match self {
            Self::Succeeded(report) => Ok(report),
            Self::Failed(err) => Err(err),
            Self::Cancelled => Err(PipelineError::Cancelled),
        }
    }

    /// Short label for logs
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Handle returned by `Scheduler::start`
///
/// Cloning is cheap; every clone observes the same run.
pub struct PipelineRun<R> {
    id: RunId,
    events: Arc<RunEventLog>,
    states: SharedStates,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<RunOutcome<R>>>,
}

impl<R> Clone for PipelineRun<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            events: Arc::clone(&self.events),
            states: Arc::clone(&self.states),
            cancel: self.cancel.clone(),
            outcome: self.outcome.clone(),
        }
    }
}

impl<R> fmt::Debug for PipelineRun<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRun")
            .field("id", &self.id)
            .field("events", &self.events.len())
            .field("finished", &self.events.is_closed())
            .finish_non_exhaustive()
    }
}

impl<R> PipelineRun<R> {
    pub(crate) fn new(
        id: RunId,
        events: Arc<RunEventLog>,
        states: SharedStates,
        cancel: CancellationToken,
        outcome: watch::Receiver<Option<RunOutcome<R>>>,
    ) -> Self {
        Self {
            id,
            events,
            states,
            cancel,
            outcome,
        }
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Subscribe to state changes, replaying from the first event
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Every event published so far
    #[must_use]
    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.events.events()
    }

    /// Snapshot of every stage's state, in registration order
    #[must_use]
    pub fn states(&self) -> Vec<StageExecutionState> {
        self.states.read().values().cloned().collect()
    }

    /// Snapshot of one stage's state
    #[must_use]
    pub fn state(&self, stage: &StageId) -> Option<StageExecutionState> {
        self.states.read().get(stage).cloned()
    }

    /// Current status of one stage
    #[must_use]
    pub fn status(&self, stage: &StageId) -> Option<StageStatus> {
        self.states.read().get(stage).map(|s| s.status)
    }

    /// Request cancellation; a no-op once the run finished
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the run reached its outcome
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Outcome, if the run finished
    #[must_use]
    pub fn outcome(&self) -> Option<RunOutcome<R>> {
        self.outcome.borrow().clone()
    }

    /// Wait for the run's outcome
    pub async fn wait(&self) -> RunOutcome<R> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(RunOutcome::Cancelled),
            // Coordinator dropped without reporting; only happens if its
            // runtime shut down mid-run.
            Err(_) => RunOutcome::Cancelled,
        };
        outcome
    }
}
