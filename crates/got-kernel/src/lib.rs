//! GoT Kernel (got-kernel)
//!
//! Orchestration core for Graph-of-Thoughts pipelines, in two phases:
//! 1. **Construction**: declare stages, validate the dependency graph
//! 2. **Execution**: drive validated graphs with bound agents
//!
//! The kernel knows nothing about what agents compute. Everything flowing
//! along graph edges is typed by a [`PipelineTypes`] implementation.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use got_kernel::prelude::*;
//!
//! // Construction phase
//! let registry = StageRegistry::register(stages)?;
//! let validated = validate(registry)?;
//!
//! // Execution phase
//! let scheduler = Scheduler::new(validated, agents, SchedulerConfig::default())?;
//! let run = scheduler.start(input, aggregator);
//! let mut events = run.subscribe();
//! while let Some(event) = events.next().await { /* ... */ }
//! let outcome = run.wait().await;
//! ```

pub mod aggregation;
pub mod construction;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod run;
pub mod scheduler;
pub mod state_machine;
pub mod types;

pub use error::*;
pub use types::*;

/// Commonly used items
pub mod prelude {
    pub use crate::aggregation::{ensure_complete, required_for_report, CompletedStages, ResultAggregator};
    pub use crate::construction::{validate, ConstructionValidator, ValidatedRegistry};
    pub use crate::error::{
        AgentError, AgentErrorKind, CycleDetected, PipelineError, RegistryError, StateMachineError,
    };
    pub use crate::events::{EventSubscription, RunEventLog, StateChangeEvent};
    pub use crate::executor::{
        AgentSet, ProgressReporter, RetryPolicy, StageAgent, StageContext, StagePolicy,
    };
    pub use crate::registry::StageRegistry;
    pub use crate::run::{PipelineRun, RunOutcome};
    pub use crate::scheduler::{Scheduler, SchedulerConfig};
    pub use crate::types::{
        AgentKind, PipelineTypes, RunId, StageDefinition, StageExecutionState, StageId, StageStatus,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
