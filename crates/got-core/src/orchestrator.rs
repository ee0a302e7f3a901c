//! Entry point for the presentation layer
//!
//! Resolves a video reference, starts a run on the shared scheduler and
//! keeps a handle per active run. Runs are independent: starting the same
//! reference twice yields two runs with their own state and events.

use crate::agents::build_agents;
use crate::aggregate::AnalysisAggregator;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::output::VideoAnalysis;
use crate::pipeline::{build_registry, report_stage};
use crate::services::{
    FileMediaSource, FixtureMediaSource, MediaResolver, MediaSource, ServiceRouter, YouTubeMediaSource,
};
use crate::types::AnalysisResult;
use dashmap::DashMap;
use got_kernel::aggregation::required_for_report;
use got_kernel::events::EventSubscription;
use got_kernel::run::PipelineRun;
use got_kernel::scheduler::Scheduler;
use got_kernel::{PipelineError, RunId, StageDefinition, StageExecutionState, StageId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

/// Handle to one analysis run
pub type AnalysisRun = PipelineRun<AnalysisResult>;

/// Starts and tracks analysis runs
pub struct AnalysisOrchestrator {
    scheduler: Scheduler<VideoAnalysis>,
    media: Arc<dyn MediaSource>,
    required: BTreeSet<StageId>,
    runs: DashMap<RunId, AnalysisRun>,
}

impl std::fmt::Debug for AnalysisOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisOrchestrator")
            .field("scheduler", &self.scheduler)
            .field("required", &self.required)
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}

impl AnalysisOrchestrator {
    /// Build the stage graph and bind every agent
    ///
    /// # Errors
    /// Returns `AnalysisError::Pipeline` for a malformed graph or an
    /// unbound agent kind.
    pub fn new(config: &AnalysisConfig, router: Arc<ServiceRouter>, media: Arc<dyn MediaSource>) -> Result<Self> {
        let validated = build_registry(config)?;
        let required = required_for_report(&validated, &report_stage());
        let scheduler = Scheduler::new(validated, build_agents(router, config), config.scheduler_config())?;
        Ok(Self {
            scheduler,
            media,
            required,
            runs: DashMap::new(),
        })
    }

    /// Demo panel with fixture services
    ///
    /// # Errors
    /// Same as [`AnalysisOrchestrator::new`].
    pub fn offline(config: &AnalysisConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(ServiceRouter::offline(config)),
            Arc::new(FixtureMediaSource),
        )
    }

    /// HTTP model services, local files and YouTube
    ///
    /// # Errors
    /// Returns `AnalysisError::Service` if an HTTP client cannot be built.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let router = ServiceRouter::from_config(config)?;
        let youtube = YouTubeMediaSource::new(
            &config.endpoints.youtube,
            &config.credentials.youtube_api_key,
            config.request_timeout(),
        )?
        .with_rate_limit(config.limits.requests_per_minute.youtube);
        let media = MediaResolver::new(FileMediaSource::new()).with_youtube(youtube);
        Self::new(config, Arc::new(router), Arc::new(media))
    }

    /// Resolve the reference and start a run
    ///
    /// The run stays tracked after it finishes so its outcome and events
    /// remain reachable by id. Release it with [`reset`](Self::reset) or
    /// [`release_finished`](Self::release_finished).
    ///
    /// # Errors
    /// Returns `PipelineError::InputUnavailable` if the media cannot be
    /// resolved; no stage is started in that case.
    #[tracing::instrument(skip(self))]
    pub async fn start_run(&self, reference: &str) -> Result<AnalysisRun> {
        let started = Instant::now();
        let asset = self.media.resolve(reference).await.map_err(|e| {
            tracing::warn!(error = %e, "media unavailable");
            AnalysisError::Pipeline(PipelineError::InputUnavailable(e.to_string()))
        })?;

        let aggregator = AnalysisAggregator::new(self.required.clone(), started);
        let run = self.scheduler.start(Arc::new(asset), Arc::new(aggregator));
        tracing::info!(run = %run.id(), "analysis started");
        self.runs.insert(run.id(), run.clone());
        Ok(run)
    }

    /// Handle for a tracked run, finished or not
    #[must_use]
    pub fn get(&self, run_id: RunId) -> Option<AnalysisRun> {
        self.runs.get(&run_id).map(|r| r.value().clone())
    }

    /// Every state change of a run, from its first event
    ///
    /// # Errors
    /// Returns `AnalysisError::UnknownRun` if the run is not tracked.
    pub fn subscribe(&self, run_id: RunId) -> Result<EventSubscription> {
        self.get(run_id)
            .map(|run| run.subscribe())
            .ok_or(AnalysisError::UnknownRun(run_id))
    }

    /// Current stage states of a run
    ///
    /// # Errors
    /// Returns `AnalysisError::UnknownRun` if the run is not tracked.
    pub fn states(&self, run_id: RunId) -> Result<Vec<StageExecutionState>> {
        self.get(run_id)
            .map(|run| run.states())
            .ok_or(AnalysisError::UnknownRun(run_id))
    }

    /// Cancel a run; a no-op once it finished
    ///
    /// # Errors
    /// Returns `AnalysisError::UnknownRun` if the run is not tracked.
    pub fn cancel(&self, run_id: RunId) -> Result<()> {
        let run = self.get(run_id).ok_or(AnalysisError::UnknownRun(run_id))?;
        run.cancel();
        Ok(())
    }

    /// Forget a run, cancelling it if still in flight
    ///
    /// Returns `false` if the run was not tracked.
    pub fn reset(&self, run_id: RunId) -> bool {
        match self.runs.remove(&run_id) {
            Some((_, run)) => {
                if !run.is_finished() {
                    run.cancel();
                }
                tracing::debug!(run = %run_id, "run released");
                true
            }
            None => false,
        }
    }

    /// Forget every finished run, returning their ids
    pub fn release_finished(&self) -> Vec<RunId> {
        let mut released = Vec::new();
        self.runs.retain(|id, run| {
            let finished = run.is_finished();
            if finished {
                released.push(*id);
            }
            !finished
        });
        released.sort();
        if !released.is_empty() {
            tracing::debug!(runs = released.len(), "finished runs released");
        }
        released
    }

    /// Ids of tracked runs that have not finished
    #[must_use]
    pub fn active_runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self
            .runs
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    /// Stage definitions in dependency order
    #[must_use]
    pub fn stages(&self) -> Vec<StageDefinition> {
        let registry = self.scheduler.registry();
        registry
            .topological_order()
            .iter()
            .filter_map(|id| registry.get(id).cloned())
            .collect()
    }

    /// Stages whose completion a report requires
    #[must_use]
    pub fn required_stages(&self) -> &BTreeSet<StageId> {
        &self.required
    }
}
