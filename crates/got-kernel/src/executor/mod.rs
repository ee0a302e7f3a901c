//! Agent Invocation Boundary
//!
//! Agents are the only code that talks to external services. The executor
//! wraps each invocation with the stage policy: an optional timeout, retry
//! with exponential backoff for transient causes, and panic capture so a
//! misbehaving agent fails its own stage instead of the run.

use crate::error::{AgentError, AgentErrorKind, PipelineError};
use crate::construction::ValidatedRegistry;
use crate::types::{AgentKind, PipelineTypes, RunId, StageDefinition, StageId};
use futures::FutureExt;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
pub use tokio_util::sync::CancellationToken;

/// A unit of analysis work bound to one `AgentKind`
///
/// Implementations must be stateless across runs; everything they need
/// arrives through the [`StageContext`].
#[async_trait::async_trait]
pub trait StageAgent<P: PipelineTypes>: Send + Sync {
    /// Produce this stage's output from the run input and upstream outputs
    async fn invoke(&self, ctx: StageContext<P>) -> Result<P::Output, AgentErrorKind>;
}

/// Progress signal sent from a running agent to its coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProgressUpdate {
    pub(crate) stage_id: StageId,
    pub(crate) progress: u8,
}

/// Handle an agent uses to report intermediate progress
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    stage_id: StageId,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub(crate) fn new(stage_id: StageId, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            stage_id,
            tx: Some(tx),
        }
    }

    /// Reporter that discards everything, for calling agents outside a run
    #[must_use]
    pub fn detached(stage_id: StageId) -> Self {
        Self { stage_id, tx: None }
    }

    /// Report progress in percent; values above 100 are clamped
    pub fn report(&self, progress: u8) {
        if let Some(tx) = &self.tx {
            // The coordinator is gone once the run ended; nothing to tell.
            let _ = tx.send(ProgressUpdate {
                stage_id: self.stage_id.clone(),
                progress: progress.min(100),
            });
        }
    }

    /// Report progress as `done` of `total` steps
    pub fn report_fraction(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let pct = (done.min(total) * 100) / total;
        self.report(u8::try_from(pct).unwrap_or(100));
    }
}

/// Everything an agent receives for one invocation
pub struct StageContext<P: PipelineTypes> {
    run_id: RunId,
    definition: Arc<StageDefinition>,
    input: Arc<P::Input>,
    upstream: BTreeMap<StageId, Arc<P::Output>>,
    progress: ProgressReporter,
    cancel: CancellationToken,
    attempt: u32,
}

impl<P: PipelineTypes> Clone for StageContext<P> {
    fn clone(&self) -> Self {
        Self {
            run_id: self.run_id,
            definition: Arc::clone(&self.definition),
            input: Arc::clone(&self.input),
            upstream: self.upstream.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
            attempt: self.attempt,
        }
    }
}

impl<P: PipelineTypes> fmt::Debug for StageContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("run_id", &self.run_id)
            .field("stage_id", &self.definition.id)
            .field("upstream", &self.upstream.keys().collect::<Vec<_>>())
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

impl<P: PipelineTypes> StageContext<P> {
    /// Assemble a context
    ///
    /// The scheduler builds these for every invocation; agents and tests
    /// may build their own to call an agent directly.
    #[must_use]
    pub fn new(
        run_id: RunId,
        definition: Arc<StageDefinition>,
        input: Arc<P::Input>,
        upstream: BTreeMap<StageId, Arc<P::Output>>,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            definition,
            input,
            upstream,
            progress,
            cancel,
            attempt: 1,
        }
    }

    /// Run being executed
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stage being executed
    #[inline]
    #[must_use]
    pub fn stage_id(&self) -> &StageId {
        &self.definition.id
    }

    /// Static declaration of the stage
    #[inline]
    #[must_use]
    pub fn definition(&self) -> &StageDefinition {
        &self.definition
    }

    /// Run-level input
    #[inline]
    #[must_use]
    pub fn input(&self) -> &P::Input {
        &self.input
    }

    /// Outputs of every direct dependency
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &BTreeMap<StageId, Arc<P::Output>> {
        &self.upstream
    }

    /// Output of one direct dependency
    #[must_use]
    pub fn output_of(&self, stage: &StageId) -> Option<&P::Output> {
        self.upstream.get(stage).map(AsRef::as_ref)
    }

    /// Output of a dependency, or `MalformedInput` naming it
    ///
    /// # Errors
    /// Returns `AgentErrorKind::MalformedInput` if the stage is not a
    /// completed dependency.
    pub fn require(&self, stage: &str) -> Result<&P::Output, AgentErrorKind> {
        self.upstream
            .get(&StageId::from(stage))
            .map(AsRef::as_ref)
            .ok_or_else(|| {
                AgentErrorKind::MalformedInput(format!(
                    "{} has no output from upstream stage {stage}",
                    self.definition.id
                ))
            })
    }

    /// Progress reporter bound to this stage
    #[inline]
    #[must_use]
    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Shorthand for `progress().report(pct)`
    pub fn report_progress(&self, pct: u8) {
        self.progress.report(pct);
    }

    /// Cancellation signal for cooperative agents
    #[inline]
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// True once the run was cancelled
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 1-based attempt number
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Binding of agent kinds to implementations
pub struct AgentSet<P: PipelineTypes> {
    agents: HashMap<AgentKind, Arc<dyn StageAgent<P>>>,
}

impl<P: PipelineTypes> Default for AgentSet<P> {
    fn default() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }
}

impl<P: PipelineTypes> Clone for AgentSet<P> {
    fn clone(&self) -> Self {
        Self {
            agents: self.agents.clone(),
        }
    }
}

impl<P: PipelineTypes> fmt::Debug for AgentSet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.agents.keys().collect();
        kinds.sort();
        f.debug_struct("AgentSet").field("kinds", &kinds).finish()
    }
}

impl<P: PipelineTypes> AgentSet<P> {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an agent, builder style
    #[must_use]
    pub fn with(mut self, kind: AgentKind, agent: Arc<dyn StageAgent<P>>) -> Self {
        self.bind(kind, agent);
        self
    }

    /// Bind an agent, replacing any previous binding for the kind
    pub fn bind(&mut self, kind: AgentKind, agent: Arc<dyn StageAgent<P>>) {
        self.agents.insert(kind, agent);
    }

    /// Agent bound to a kind
    #[must_use]
    pub fn get(&self, kind: AgentKind) -> Option<&Arc<dyn StageAgent<P>>> {
        self.agents.get(&kind)
    }

    /// Check whether a kind is bound
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: AgentKind) -> bool {
        self.agents.contains_key(&kind)
    }

    /// Number of bound kinds
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True if nothing is bound
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Verify every stage in the registry has an agent
    ///
    /// # Errors
    /// Returns `PipelineError::UnboundAgent` for the first unbound stage in
    /// registration order.
    pub fn ensure_bound(&self, validated: &ValidatedRegistry) -> Result<(), PipelineError> {
        match validated
            .registry()
            .all()
            .find(|def| !self.contains(def.agent_kind))
        {
            Some(def) => Err(PipelineError::UnboundAgent {
                stage: def.id.clone(),
                kind: def.agent_kind,
            }),
            None => Ok(()),
        }
    }
}

/// Retry behaviour for transient agent failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Upper bound on any single delay
    pub max_backoff: Duration,
    /// Random fraction (0.0-1.0) subtracted from each delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// Single attempt, no retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Exponential backoff with the given attempt budget
    #[must_use]
    pub fn exponential(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    /// With jitter fraction
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// With backoff cap
    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Delay to wait after `failed_attempt` (1-based) failed
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exponent = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff.as_nanos() as f64).max(0.0);
        let factor = if self.jitter > 0.0 {
            1.0 - rand::rng().random_range(0.0..=self.jitter)
        } else {
            1.0
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = (capped * factor).round() as u64;
        Duration::from_nanos(nanos)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Per-stage invocation policy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePolicy {
    /// Limit on a single attempt; `None` waits forever
    pub timeout: Option<Duration>,
    /// Retry behaviour
    pub retry: RetryPolicy,
}

impl StagePolicy {
    /// With timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// With retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Final result of running one stage under its policy
#[derive(Debug)]
pub(crate) struct StageOutcome<O> {
    pub(crate) stage_id: StageId,
    pub(crate) attempts: u32,
    pub(crate) result: Result<O, AgentError>,
}

/// Invoke an agent under a stage policy
///
/// Each attempt gets a fresh clone of `ctx` with its attempt number set.
/// Only causes reported as retryable are retried, and never after the
/// context's cancellation token fired.
pub(crate) async fn invoke_with_policy<P: PipelineTypes>(
    agent: Arc<dyn StageAgent<P>>,
    ctx: StageContext<P>,
    policy: &StagePolicy,
) -> StageOutcome<P::Output> {
    let stage_id = ctx.stage_id().clone();
    let max_attempts = policy.retry.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let mut attempt_ctx = ctx.clone();
        attempt_ctx.attempt = attempt;

        let cause = match invoke_once(&agent, attempt_ctx, policy.timeout).await {
            Ok(output) => {
                return StageOutcome {
                    stage_id,
                    attempts: attempt,
                    result: Ok(output),
                }
            }
            Err(cause) => cause,
        };

        if attempt >= max_attempts || !cause.is_retryable() || ctx.is_cancelled() {
            return StageOutcome {
                stage_id: stage_id.clone(),
                attempts: attempt,
                result: Err(AgentError::new(stage_id, cause)),
            };
        }

        let delay = policy.retry.backoff_for(attempt);
        tracing::warn!(
            stage = %stage_id,
            attempt,
            max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %cause,
            "agent invocation failed, retrying"
        );

        tokio::select! {
            () = ctx.cancellation().cancelled() => {
                return StageOutcome {
                    stage_id: stage_id.clone(),
                    attempts: attempt,
                    result: Err(AgentError::new(stage_id, AgentErrorKind::Cancelled)),
                };
            }
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

async fn invoke_once<P: PipelineTypes>(
    agent: &Arc<dyn StageAgent<P>>,
    ctx: StageContext<P>,
    timeout: Option<Duration>,
) -> Result<P::Output, AgentErrorKind> {
    let call = AssertUnwindSafe(agent.invoke(ctx)).catch_unwind();

    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(AgentErrorKind::Timeout(limit)),
        },
        None => call.await,
    };

    caught.unwrap_or_else(|payload| Err(AgentErrorKind::Panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
