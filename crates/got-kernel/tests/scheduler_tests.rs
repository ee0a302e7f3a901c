//! End-to-end runs through the scheduler with scripted agents

use got_kernel::error::{AgentErrorKind, PipelineError};
use got_kernel::executor::{AgentSet, RetryPolicy, StagePolicy};
use got_kernel::run::RunOutcome;
use got_kernel::scheduler::{Scheduler, SchedulerConfig};
use got_kernel::types::{AgentKind, StageId, StageStatus};
use got_test_utils::{
    bind_all, collect_events, diamond, final_status, progress_of, stage, statuses_of, validated,
    CollectingAggregator, ScriptedAgent, TestPipeline,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn scheduler(agent: &Arc<ScriptedAgent>, stages: Vec<got_kernel::StageDefinition>) -> Scheduler<TestPipeline> {
    scheduler_with(agent, stages, SchedulerConfig::default())
}

fn scheduler_with(
    agent: &Arc<ScriptedAgent>,
    stages: Vec<got_kernel::StageDefinition>,
    config: SchedulerConfig,
) -> Scheduler<TestPipeline> {
    Scheduler::new(validated(stages), bind_all(agent.clone()), config).unwrap()
}

fn ids(names: &[&str]) -> Vec<StageId> {
    names.iter().map(|s| StageId::from(*s)).collect()
}

fn input() -> Arc<String> {
    Arc::new("clip.mp4".to_string())
}

#[tokio::test]
async fn test_diamond_runs_in_dependency_order() {
    let agent = ScriptedAgent::new().into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    let outcome = run.wait().await;
    let report = outcome.report().unwrap();
    assert_eq!(*report, ids(&["A", "B", "C", "D"]));

    let a = agent.started_at("A").unwrap();
    let d = agent.started_at("D").unwrap();
    assert_eq!(a, 0);
    assert!(agent.started_at("B").unwrap() > a);
    assert!(agent.started_at("C").unwrap() > a);
    assert_eq!(d, 3);

    assert_eq!(agent.seen_inputs("A"), Some(vec![]));
    assert_eq!(agent.seen_inputs("B"), Some(ids(&["A"])));
    assert_eq!(agent.seen_inputs("D"), Some(ids(&["B", "C"])));

    for name in ["A", "B", "C", "D"] {
        assert_eq!(agent.invocation_count(name), 1, "{name} invoked more than once");
        assert_eq!(run.status(&name.into()), Some(StageStatus::Completed));
    }
}

#[tokio::test(start_paused = true)]
async fn test_independent_stages_run_concurrently() {
    let agent = ScriptedAgent::new()
        .delay("B", Duration::from_millis(200))
        .delay("C", Duration::from_millis(200))
        .into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    let started = tokio::time::Instant::now();
    assert!(run.wait().await.is_success());

    assert_eq!(agent.peak_concurrency(), 2);
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let agent = ScriptedAgent::new()
        .delay("B", Duration::from_millis(50))
        .delay("C", Duration::from_millis(50))
        .into_shared();
    let config = SchedulerConfig::default().with_max_concurrency(1);
    let run = scheduler_with(&agent, diamond(), config)
        .start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    assert!(run.wait().await.is_success());
    assert_eq!(agent.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_zero_concurrency_limit_still_runs_stages() {
    let agent = ScriptedAgent::new().into_shared();
    let config = SchedulerConfig::default().with_max_concurrency(0);
    assert_eq!(config.max_concurrency(), Some(1));

    let run = scheduler_with(&agent, diamond(), config)
        .start(input(), CollectingAggregator::requiring(&["D"]).into_shared());
    assert!(run.wait().await.is_success());
    for name in ["A", "B", "C", "D"] {
        assert_eq!(run.status(&name.into()), Some(StageStatus::Completed));
    }
}

#[tokio::test]
async fn test_failure_blocks_dependents_only() {
    let agent = ScriptedAgent::new()
        .fail("B", AgentErrorKind::Validation("no faces".into()))
        .into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&[]).into_shared());

    let outcome = run.wait().await;
    let events = collect_events(&run).await;

    assert_eq!(*outcome.report().unwrap(), ids(&["A", "C"]));
    assert_eq!(final_status(&events, "B"), Some(StageStatus::Failed));
    assert_eq!(final_status(&events, "C"), Some(StageStatus::Completed));
    assert_eq!(statuses_of(&events, "D"), vec![StageStatus::Pending, StageStatus::Blocked]);
    assert_eq!(agent.invocation_count("D"), 0);

    let d = run.state(&"D".into()).unwrap();
    assert_eq!(d.error.as_deref(), Some("dependency B failed"));
    let b = run.state(&"B".into()).unwrap();
    assert_eq!(b.error.as_deref(), Some("validation failed: no faces"));
}

#[tokio::test]
async fn test_blocked_required_stage_fails_aggregation() {
    let agent = ScriptedAgent::new()
        .fail("A", AgentErrorKind::Service("503".into()))
        .into_shared();
    let stages = vec![stage("A", &[]), stage("B", &["A"])];
    let run = scheduler(&agent, stages).start(input(), CollectingAggregator::requiring(&["B"]).into_shared());

    match run.wait().await {
        RunOutcome::Failed(err) => assert_eq!(err, PipelineError::incomplete(ids(&["B"]))),
        other => panic!("expected incomplete aggregation, got {}", other.label()),
    }
    assert_eq!(run.status(&"B".into()), Some(StageStatus::Blocked));
}

#[tokio::test]
async fn test_missing_stages_are_reported_in_registry_order() {
    let agent = ScriptedAgent::new()
        .fail("A", AgentErrorKind::Service("down".into()))
        .into_shared();
    let run = scheduler(&agent, diamond())
        .start(input(), CollectingAggregator::requiring(&["D", "C", "B"]).into_shared());

    let err = run.wait().await.into_result().unwrap_err();
    assert_eq!(err, PipelineError::incomplete(ids(&["B", "C", "D"])));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_aggregator_rejection_fails_run() {
    let agent = ScriptedAgent::new().into_shared();
    let run = scheduler(&agent, diamond()).start(
        input(),
        CollectingAggregator::requiring(&["D"]).rejecting("empty report").into_shared(),
    );

    assert_eq!(
        run.wait().await.into_result().unwrap_err(),
        PipelineError::Aggregation("empty report".into())
    );
}

#[tokio::test]
async fn test_cancel_stops_in_flight_and_pending_stages() {
    let agent = ScriptedAgent::new().hang("B").into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    // Wait until B is actually running
    let mut sub = run.subscribe();
    while let Some(event) = sub.next().await {
        if event.stage_id.as_str() == "B" && event.status == StageStatus::Running {
            break;
        }
    }
    run.cancel();

    assert!(matches!(run.wait().await, RunOutcome::Cancelled));
    assert_eq!(run.status(&"A".into()), Some(StageStatus::Completed));
    assert_eq!(run.status(&"B".into()), Some(StageStatus::Cancelled));
    assert_eq!(run.status(&"D".into()), Some(StageStatus::Cancelled));
    assert_eq!(agent.invocation_count("D"), 0);

    // The event stream ends once the run is over
    let events = collect_events(&run).await;
    assert_eq!(final_status(&events, "D"), Some(StageStatus::Cancelled));

    // Cancelling again is harmless
    run.cancel();
    assert!(matches!(run.wait().await, RunOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_stage_and_blocks_dependents() {
    let agent = ScriptedAgent::new().hang("C").into_shared();
    let config = SchedulerConfig::default()
        .with_stage_policy("C", StagePolicy::default().with_timeout(Duration::from_secs(5)));
    let run = scheduler_with(&agent, diamond(), config)
        .start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    let err = run.wait().await.into_result().unwrap_err();
    assert_eq!(err, PipelineError::incomplete(ids(&["D"])));

    let c = run.state(&"C".into()).unwrap();
    assert_eq!(c.status, StageStatus::Failed);
    assert_eq!(c.error.as_deref(), Some("timed out after 5000ms"));
    assert_eq!(run.status(&"B".into()), Some(StageStatus::Completed));
    assert_eq!(run.status(&"D".into()), Some(StageStatus::Blocked));
}

#[tokio::test(start_paused = true)]
async fn test_retry_policy_recovers_transient_failure() {
    let agent = ScriptedAgent::new()
        .fail_times("B", 2, AgentErrorKind::Service("rate limited".into()))
        .into_shared();
    let policy = StagePolicy::default().with_retry(RetryPolicy::exponential(3, Duration::from_millis(100)));
    let config = SchedulerConfig::default().with_default_policy(policy);
    let run = scheduler_with(&agent, diamond(), config)
        .start(input(), CollectingAggregator::requiring(&["D"]).into_shared());

    assert!(run.wait().await.is_success());
    assert_eq!(agent.invocation_count("B"), 3);
    assert_eq!(run.state(&"B".into()).unwrap().attempts, 3);
    assert_eq!(run.state(&"C".into()).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_without_retry_policy_each_stage_is_invoked_once() {
    let agent = ScriptedAgent::new()
        .fail("B", AgentErrorKind::Service("rate limited".into()))
        .into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&[]).into_shared());

    run.wait().await;
    assert_eq!(agent.invocation_count("B"), 1);
}

#[tokio::test]
async fn test_agent_panic_fails_only_its_stage() {
    let agent = ScriptedAgent::new().panic("C").into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&["B"]).into_shared());

    assert!(run.wait().await.is_success());
    let c = run.state(&"C".into()).unwrap();
    assert_eq!(c.status, StageStatus::Failed);
    assert_eq!(c.error.as_deref(), Some("agent panicked: scripted panic in C"));
    assert_eq!(run.status(&"D".into()), Some(StageStatus::Blocked));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_completes_at_100() {
    let agent = ScriptedAgent::new().progress("A", &[10, 50, 30, 50, 250]).into_shared();
    let run = scheduler(&agent, vec![stage("A", &[])])
        .start(input(), CollectingAggregator::requiring(&["A"]).into_shared());

    run.wait().await;
    let events = collect_events(&run).await;

    // Pending, Running, then only increases, then Completed
    assert_eq!(progress_of(&events, "A"), vec![0, 0, 10, 50, 100, 100]);
    assert_eq!(
        statuses_of(&events, "A"),
        vec![StageStatus::Pending, StageStatus::Running, StageStatus::Completed]
    );
}

#[tokio::test]
async fn test_events_are_sequenced_and_start_pending() {
    let agent = ScriptedAgent::new().into_shared();
    let run = scheduler(&agent, diamond()).start(input(), CollectingAggregator::requiring(&[]).into_shared());
    let events = collect_events(&run).await;

    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64);
        assert_eq!(event.run_id, run.id());
    }
    let first_four: Vec<_> = events.iter().take(4).map(|e| (e.stage_id.as_str(), e.status)).collect();
    assert_eq!(
        first_four,
        vec![
            ("A", StageStatus::Pending),
            ("B", StageStatus::Pending),
            ("C", StageStatus::Pending),
            ("D", StageStatus::Pending),
        ]
    );
    // Every stage ends in a terminal state
    for name in ["A", "B", "C", "D"] {
        assert!(final_status(&events, name).unwrap().is_terminal());
    }
}

#[tokio::test]
async fn test_runs_are_independent() {
    let agent = ScriptedAgent::new().delay("B", Duration::from_millis(20)).into_shared();
    let sched = scheduler(&agent, diamond());
    let aggregator = CollectingAggregator::requiring(&["D"]).into_shared();

    let first = sched.start(input(), aggregator.clone());
    let second = sched.start(Arc::new("other.mp4".to_string()), aggregator);
    assert_ne!(first.id(), second.id());

    second.cancel();
    assert!(first.wait().await.is_success());
    assert!(matches!(second.wait().await, RunOutcome::Cancelled));

    let first_events = collect_events(&first).await;
    assert!(first_events.iter().all(|e| e.run_id == first.id()));
}

#[test]
fn test_unbound_agent_is_a_startup_error() {
    let agents = AgentSet::<TestPipeline>::new();
    let err = Scheduler::new(validated(diamond()), agents, SchedulerConfig::default()).unwrap_err();

    assert_eq!(
        err,
        PipelineError::UnboundAgent {
            stage: "A".into(),
            kind: AgentKind::Fetcher,
        }
    );
    assert!(err.is_startup());
}

#[tokio::test]
async fn test_empty_registry_aggregates_immediately() {
    let agent = ScriptedAgent::new().into_shared();
    let run = scheduler(&agent, Vec::new()).start(input(), CollectingAggregator::requiring(&[]).into_shared());

    assert_eq!(*run.wait().await.report().unwrap(), Vec::<StageId>::new());
    assert!(collect_events(&run).await.is_empty());
}
