//! Testing utilities for GoT workspace
//!
//! Shared test pipeline, scripted agents, fixtures and event helpers.

#![allow(missing_docs)]

use got_kernel::aggregation::{CompletedStages, ResultAggregator};
use got_kernel::construction::{validate, ValidatedRegistry};
use got_kernel::error::{AgentErrorKind, PipelineError};
use got_kernel::events::StateChangeEvent;
use got_kernel::executor::{AgentSet, StageAgent, StageContext};
use got_kernel::registry::StageRegistry;
use got_kernel::run::PipelineRun;
use got_kernel::types::{AgentKind, PipelineTypes, StageDefinition, StageId, StageStatus};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline used by kernel tests: a string input, outputs that record lineage
#[derive(Debug, Clone, Copy)]
pub struct TestPipeline;

impl PipelineTypes for TestPipeline {
    type Input = String;
    type Output = TestOutput;
}

/// What a scripted stage produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutput {
    pub stage: StageId,
    pub attempt: u32,
    /// Upstream stages whose outputs were visible to the agent
    pub inputs: Vec<StageId>,
}

/// Stage with the given dependencies
pub fn stage(id: &str, deps: &[&str]) -> StageDefinition {
    StageDefinition::new(id, format!("stage {id}"), AgentKind::Fetcher).depends_on(deps.iter().copied())
}

/// Register and validate, panicking on error
pub fn validated(stages: Vec<StageDefinition>) -> ValidatedRegistry {
    validate(StageRegistry::register(stages).unwrap()).unwrap()
}

/// A, B, C, D with B and C depending on A and D on both
pub fn diamond() -> Vec<StageDefinition> {
    vec![
        stage("A", &[]),
        stage("B", &["A"]),
        stage("C", &["A"]),
        stage("D", &["B", "C"]),
    ]
}

/// Bind one agent to every kind
pub fn bind_all(agent: Arc<dyn StageAgent<TestPipeline>>) -> AgentSet<TestPipeline> {
    AgentKind::ALL
        .iter()
        .fold(AgentSet::new(), |set, kind| set.with(*kind, Arc::clone(&agent)))
}

#[derive(Debug, Clone, Default)]
struct Script {
    delay: Duration,
    progress: Vec<u8>,
    fail_first: u32,
    failure: Option<AgentErrorKind>,
    hang: bool,
    panic: bool,
}

/// Agent whose behaviour is scripted per stage id
///
/// Unscripted stages succeed immediately.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    scripts: HashMap<StageId, Script>,
    invocations: Mutex<Vec<StageId>>,
    seen_inputs: Mutex<HashMap<StageId, Vec<StageId>>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&mut self, stage: &str) -> &mut Script {
        self.scripts.entry(StageId::from(stage)).or_default()
    }

    /// Sleep before answering
    pub fn delay(mut self, stage: &str, delay: Duration) -> Self {
        self.script(stage).delay = delay;
        self
    }

    /// Always fail with `cause`
    pub fn fail(mut self, stage: &str, cause: AgentErrorKind) -> Self {
        let script = self.script(stage);
        script.fail_first = u32::MAX;
        script.failure = Some(cause);
        self
    }

    /// Fail the first `times` attempts, then succeed
    pub fn fail_times(mut self, stage: &str, times: u32, cause: AgentErrorKind) -> Self {
        let script = self.script(stage);
        script.fail_first = times;
        script.failure = Some(cause);
        self
    }

    /// Never answer
    pub fn hang(mut self, stage: &str) -> Self {
        self.script(stage).hang = true;
        self
    }

    /// Panic when invoked
    pub fn panic(mut self, stage: &str) -> Self {
        self.script(stage).panic = true;
        self
    }

    /// Report these progress values before answering
    pub fn progress(mut self, stage: &str, values: &[u8]) -> Self {
        self.script(stage).progress = values.to_vec();
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Stage ids in invocation order (retries appear again)
    pub fn invocations(&self) -> Vec<StageId> {
        self.invocations.lock().clone()
    }

    /// How many times a stage was invoked
    pub fn invocation_count(&self, stage: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|id| id.as_str() == stage)
            .count()
    }

    /// Position of a stage's first invocation
    pub fn started_at(&self, stage: &str) -> Option<usize> {
        self.invocations
            .lock()
            .iter()
            .position(|id| id.as_str() == stage)
    }

    /// Upstream outputs visible to a stage's last invocation
    pub fn seen_inputs(&self, stage: &str) -> Option<Vec<StageId>> {
        self.seen_inputs.lock().get(&StageId::from(stage)).cloned()
    }

    /// Highest number of concurrent invocations observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StageAgent<TestPipeline> for ScriptedAgent {
    async fn invoke(&self, ctx: StageContext<TestPipeline>) -> Result<TestOutput, AgentErrorKind> {
        self.invocations.lock().push(ctx.stage_id().clone());
        let inputs: Vec<StageId> = ctx.inputs().keys().cloned().collect();
        self.seen_inputs.lock().insert(ctx.stage_id().clone(), inputs.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        let script = self.scripts.get(ctx.stage_id()).cloned().unwrap_or_default();

        for value in &script.progress {
            ctx.report_progress(*value);
        }
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        if script.hang {
            std::future::pending::<()>().await;
        }
        if script.panic {
            panic!("scripted panic in {}", ctx.stage_id());
        }
        if ctx.attempt() <= script.fail_first {
            if let Some(cause) = script.failure {
                return Err(cause);
            }
        }

        Ok(TestOutput {
            stage: ctx.stage_id().clone(),
            attempt: ctx.attempt(),
            inputs,
        })
    }
}

/// Aggregator returning the completed stage ids
#[derive(Debug, Default)]
pub struct CollectingAggregator {
    required: BTreeSet<StageId>,
    reject: Option<String>,
}

impl CollectingAggregator {
    pub fn requiring(stages: &[&str]) -> Self {
        Self {
            required: stages.iter().map(|s| StageId::from(*s)).collect(),
            reject: None,
        }
    }

    /// Fail aggregation with the given message
    pub fn rejecting(mut self, message: &str) -> Self {
        self.reject = Some(message.to_string());
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ResultAggregator<TestPipeline> for CollectingAggregator {
    type Report = Vec<StageId>;

    fn required_stages(&self) -> &BTreeSet<StageId> {
        &self.required
    }

    fn aggregate(&self, completed: &CompletedStages<TestOutput>) -> Result<Self::Report, PipelineError> {
        if let Some(message) = &self.reject {
            return Err(PipelineError::Aggregation(message.clone()));
        }
        Ok(completed.ids().cloned().collect())
    }
}

/// Every event of a run, waiting for it to finish
pub async fn collect_events<R>(run: &PipelineRun<R>) -> Vec<StateChangeEvent> {
    run.subscribe().collect().await
}

/// Status sequence of one stage
pub fn statuses_of(events: &[StateChangeEvent], stage: &str) -> Vec<StageStatus> {
    let mut out: Vec<StageStatus> = Vec::new();
    for event in events.iter().filter(|e| e.stage_id.as_str() == stage) {
        if out.last() != Some(&event.status) {
            out.push(event.status);
        }
    }
    out
}

/// Progress values published for one stage
pub fn progress_of(events: &[StateChangeEvent], stage: &str) -> Vec<u8> {
    events
        .iter()
        .filter(|e| e.stage_id.as_str() == stage)
        .map(|e| e.progress)
        .collect()
}

/// Final status of one stage, per the event log
pub fn final_status(events: &[StateChangeEvent], stage: &str) -> Option<StageStatus> {
    events
        .iter()
        .rev()
        .find(|e| e.stage_id.as_str() == stage)
        .map(|e| e.status)
}
