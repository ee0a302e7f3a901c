//! Execution Scheduler
//!
//! The scheduler only accepts a `ValidatedRegistry`. Each run gets one
//! coordinator task that owns all per-run state: it launches every stage
//! whose dependencies completed, applies agent results and progress, blocks
//! the dependents of failed stages and finally hands the completed outputs
//! to the aggregator. Stage tasks never touch shared state; they report
//! back through the join set and a progress channel, so every state change
//! is published by a single writer in the order it was applied.

use crate::aggregation::{ensure_complete, CompletedStages, ResultAggregator};
use crate::construction::ValidatedRegistry;
use crate::error::{AgentError, PipelineError};
use crate::events::RunEventLog;
use crate::executor::{
    invoke_with_policy, AgentSet, ProgressReporter, ProgressUpdate, StageContext, StageOutcome,
    StagePolicy,
};
use crate::run::{PipelineRun, RunOutcome, SharedStates};
use crate::state_machine::validate_transition;
use crate::types::{PipelineTypes, RunId, StageExecutionState, StageId, StageStatus};
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Scheduler configuration
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Policy for stages without an override
    pub default_policy: StagePolicy,
    /// Per-stage overrides
    pub stage_policies: HashMap<StageId, StagePolicy>,
    max_concurrency: Option<usize>,
}

impl SchedulerConfig {
    /// With default policy
    #[must_use]
    pub fn with_default_policy(mut self, policy: StagePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// With a policy override for one stage
    #[must_use]
    pub fn with_stage_policy(mut self, stage: impl Into<StageId>, policy: StagePolicy) -> Self {
        self.stage_policies.insert(stage.into(), policy);
        self
    }

    /// With concurrency limit
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Maximum stages running at once within a run; `None` is unbounded
    #[inline]
    #[must_use]
    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    /// Effective policy for a stage
    #[must_use]
    pub fn policy_for(&self, stage: &StageId) -> &StagePolicy {
        self.stage_policies.get(stage).unwrap_or(&self.default_policy)
    }
}

/// Drives validated registries to completion
pub struct Scheduler<P: PipelineTypes> {
    validated: Arc<ValidatedRegistry>,
    agents: AgentSet<P>,
    config: Arc<SchedulerConfig>,
}

impl<P: PipelineTypes> Clone for Scheduler<P> {
    fn clone(&self) -> Self {
        Self {
            validated: Arc::clone(&self.validated),
            agents: self.agents.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: PipelineTypes> std::fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("stages", &self.validated.len())
            .field("agents", &self.agents)
            .field("config", &self.config)
            .finish()
    }
}

impl<P: PipelineTypes> Scheduler<P> {
    /// Create a scheduler
    ///
    /// # Errors
    /// Returns `PipelineError::UnboundAgent` if a stage's kind has no agent.
    pub fn new(
        validated: ValidatedRegistry,
        agents: AgentSet<P>,
        config: SchedulerConfig,
    ) -> Result<Self, PipelineError> {
        agents.ensure_bound(&validated)?;
        Ok(Self {
            validated: Arc::new(validated),
            agents,
            config: Arc::new(config),
        })
    }

    /// Validated registry this scheduler drives
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ValidatedRegistry {
        &self.validated
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start a run
    ///
    /// Spawns the run's coordinator on the current Tokio runtime and returns
    /// immediately. Runs are fully independent; a scheduler may drive any
    /// number of them concurrently.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    pub fn start<A>(&self, input: Arc<P::Input>, aggregator: Arc<A>) -> PipelineRun<A::Report>
    where
        A: ResultAggregator<P>,
    {
        let run_id = RunId::new();
        let events = RunEventLog::new(run_id);
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let states: SharedStates = Arc::new(RwLock::new(
            self.validated
                .registry()
                .ids()
                .map(|id| (id.clone(), StageExecutionState::pending(id.clone())))
                .collect::<IndexMap<_, _>>(),
        ));

        let coordinator = Coordinator {
            run_id,
            validated: Arc::clone(&self.validated),
            agents: self.agents.clone(),
            config: Arc::clone(&self.config),
            input,
            events: Arc::clone(&events),
            states: Arc::clone(&states),
            cancel: cancel.clone(),
            outputs: CompletedStages::new(),
            waiting_on: HashMap::new(),
            ready: VecDeque::new(),
        };

        let run_events = Arc::clone(&events);
        let span = tracing::info_span!("run", run = %run_id);
        tokio::spawn(
            async move {
                let outcome = coordinator.drive(aggregator).await;
                outcome_tx.send_replace(Some(outcome));
                run_events.close();
            }
            .instrument(span),
        );

        PipelineRun::new(run_id, events, states, cancel, outcome_rx)
    }
}

/// Per-run coordinator; sole writer of the run's state and events
struct Coordinator<P: PipelineTypes> {
    run_id: RunId,
    validated: Arc<ValidatedRegistry>,
    agents: AgentSet<P>,
    config: Arc<SchedulerConfig>,
    input: Arc<P::Input>,
    events: Arc<RunEventLog>,
    states: SharedStates,
    cancel: CancellationToken,
    outputs: CompletedStages<P::Output>,
    /// Unfinished dependency count per pending stage
    waiting_on: HashMap<StageId, usize>,
    ready: VecDeque<StageId>,
}

impl<P: PipelineTypes> Coordinator<P> {
    async fn drive<A>(mut self, aggregator: Arc<A>) -> RunOutcome<A::Report>
    where
        A: ResultAggregator<P>,
    {
        tracing::info!(stages = self.validated.len(), "run started");

        for def in self.validated.registry().all() {
            self.events.publish(&def.id, StageStatus::Pending, 0, None);
            if def.is_root() {
                self.ready.push_back(def.id.clone());
            } else {
                self.waiting_on.insert(def.id.clone(), def.depends_on.len());
            }
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let mut tasks: JoinSet<StageOutcome<P::Output>> = JoinSet::new();
        let mut cancelled = false;

        self.launch_ready(&mut tasks, &progress_tx);

        while !tasks.is_empty() {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }

                Some(update) = progress_rx.recv() => {
                    self.apply_progress(&update);
                }

                Some(joined) = tasks.join_next() => {
                    // Progress sent before the agent returned must land first.
                    while let Ok(update) = progress_rx.try_recv() {
                        self.apply_progress(&update);
                    }
                    match joined {
                        Ok(outcome) => self.apply_outcome(outcome),
                        Err(err) => tracing::error!(error = %err, "stage task terminated abnormally"),
                    }
                    self.launch_ready(&mut tasks, &progress_tx);
                }
            }
        }

        if cancelled {
            tasks.shutdown().await;
            self.cancel_remaining();
            tracing::info!(completed = self.outputs.len(), "run cancelled");
            return RunOutcome::Cancelled;
        }

        self.settle_leftovers();
        self.outputs.sort_by_registry(&self.validated);

        let outcome = ensure_complete(aggregator.required_stages(), &self.validated, &self.outputs)
            .and_then(|()| aggregator.aggregate(&self.outputs));

        match outcome {
            Ok(report) => {
                tracing::info!(completed = self.outputs.len(), "run succeeded");
                RunOutcome::Succeeded(Arc::new(report))
            }
            Err(err) => {
                tracing::warn!(error = %err, completed = self.outputs.len(), "run failed");
                RunOutcome::Failed(err)
            }
        }
    }

    fn launch_ready(
        &mut self,
        tasks: &mut JoinSet<StageOutcome<P::Output>>,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        while let Some(stage_id) = self.ready.pop_front() {
            if self
                .config
                .max_concurrency
                .is_some_and(|limit| tasks.len() >= limit)
            {
                self.ready.push_front(stage_id);
                break;
            }
            self.launch(stage_id, tasks, progress_tx);
        }
    }

    fn launch(
        &mut self,
        stage_id: StageId,
        tasks: &mut JoinSet<StageOutcome<P::Output>>,
        progress_tx: &mpsc::UnboundedSender<ProgressUpdate>,
    ) {
        let registry = self.validated.registry();
        let Some(definition) = registry.get_shared(&stage_id) else {
            return;
        };
        // Bindings were checked when the scheduler was built.
        let Some(agent) = self.agents.get(definition.agent_kind).cloned() else {
            tracing::error!(stage = %stage_id, kind = %definition.agent_kind, "no agent bound");
            return;
        };

        let upstream: BTreeMap<StageId, Arc<P::Output>> = definition
            .depends_on
            .iter()
            .filter_map(|dep| self.outputs.get_shared(dep).map(|out| (dep.clone(), out)))
            .collect();

        if !self.transition(&stage_id, StageStatus::Running, None) {
            return;
        }

        let ctx = StageContext::new(
            self.run_id,
            definition,
            Arc::clone(&self.input),
            upstream,
            ProgressReporter::new(stage_id.clone(), progress_tx.clone()),
            self.cancel.child_token(),
        );
        let policy = self.config.policy_for(&stage_id).clone();
        let span = tracing::info_span!("stage", stage = %stage_id);

        tracing::debug!(stage = %stage_id, "stage started");
        tasks.spawn(async move { invoke_with_policy(agent, ctx, &policy).await }.instrument(span));
    }

    fn apply_progress(&mut self, update: &ProgressUpdate) {
        let progress = update.progress.min(100);
        {
            let mut states = self.states.write();
            let Some(state) = states.get_mut(&update.stage_id) else {
                return;
            };
            if state.status != StageStatus::Running || progress <= state.progress {
                return;
            }
            state.progress = progress;
        }
        self.events
            .publish(&update.stage_id, StageStatus::Running, progress, None);
    }

    fn apply_outcome(&mut self, outcome: StageOutcome<P::Output>) {
        let StageOutcome {
            stage_id,
            attempts,
            result,
        } = outcome;

        if let Some(state) = self.states.write().get_mut(&stage_id) {
            state.attempts = attempts;
        }

        match result {
            Ok(output) => {
                if self.transition(&stage_id, StageStatus::Completed, None) {
                    tracing::debug!(stage = %stage_id, attempts, "stage completed");
                    self.outputs.insert(stage_id.clone(), Arc::new(output));
                    self.release_dependents(&stage_id);
                }
            }
            Err(err) => self.fail(&stage_id, &err),
        }
    }

    fn release_dependents(&mut self, stage_id: &StageId) {
        for dependent in self.validated.dependents(stage_id) {
            if let Some(remaining) = self.waiting_on.get_mut(&dependent) {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    self.waiting_on.remove(&dependent);
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    fn fail(&mut self, stage_id: &StageId, err: &AgentError) {
        tracing::warn!(stage = %stage_id, error = %err.cause, "stage failed");
        if !self.transition(stage_id, StageStatus::Failed, Some(err.cause.to_string())) {
            return;
        }

        let reason = format!("dependency {stage_id} failed");
        for dependent in self.validated.transitive_dependents(stage_id) {
            if self.status(&dependent) == Some(StageStatus::Pending) {
                self.waiting_on.remove(&dependent);
                self.ready.retain(|id| *id != dependent);
                self.transition(&dependent, StageStatus::Blocked, Some(reason.clone()));
            }
        }
    }

    /// Anything still pending after the loop could never become ready.
    fn settle_leftovers(&mut self) {
        let leftovers: Vec<(StageId, StageStatus)> = self
            .states
            .read()
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| (s.stage_id.clone(), s.status))
            .collect();

        for (stage_id, status) in leftovers {
            let (to, reason) = match status {
                StageStatus::Running => (StageStatus::Failed, "stage task terminated abnormally"),
                _ => (StageStatus::Blocked, "dependencies did not complete"),
            };
            self.transition(&stage_id, to, Some(reason.to_string()));
        }
    }

    fn cancel_remaining(&mut self) {
        let open: Vec<StageId> = self
            .states
            .read()
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.stage_id.clone())
            .collect();

        for stage_id in open {
            self.transition(&stage_id, StageStatus::Cancelled, None);
        }
    }

    fn status(&self, stage_id: &StageId) -> Option<StageStatus> {
        self.states.read().get(stage_id).map(|s| s.status)
    }

    /// Apply a status change and publish it
    ///
    /// Returns false (and publishes nothing) for illegal transitions.
    fn transition(&self, stage_id: &StageId, to: StageStatus, error: Option<String>) -> bool {
        let progress = {
            let mut states = self.states.write();
            let Some(state) = states.get_mut(stage_id) else {
                return false;
            };
            if let Err(err) = validate_transition(stage_id, state.status, to) {
                tracing::error!(error = %err, "rejected status change");
                return false;
            }

            let now = Utc::now();
            match to {
                StageStatus::Running => state.started_at = Some(now),
                StageStatus::Completed => {
                    state.progress = 100;
                    state.finished_at = Some(now);
                }
                _ => state.finished_at = Some(now),
            }
            state.status = to;
            state.error.clone_from(&error);
            state.progress
        };

        self.events.publish(stage_id, to, progress, error);
        true
    }
}
