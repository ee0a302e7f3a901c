//! Every subscriber sees the same complete, ordered event sequence

use futures::StreamExt;
use got_kernel::scheduler::{Scheduler, SchedulerConfig};
use got_kernel::types::StageStatus;
use got_test_utils::{bind_all, diamond, validated, CollectingAggregator, ScriptedAgent};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_subscribers_receive_identical_sequences() {
    let agent = ScriptedAgent::new()
        .delay("B", Duration::from_millis(10))
        .progress("C", &[25, 75])
        .into_shared();
    let scheduler = Scheduler::new(validated(diamond()), bind_all(agent), SchedulerConfig::default()).unwrap();
    let run = scheduler.start(
        Arc::new("talk.mp4".to_string()),
        CollectingAggregator::requiring(&["D"]).into_shared(),
    );

    let early = tokio::spawn(run.subscribe().collect());
    let streamed = tokio::spawn(run.subscribe().into_stream().collect::<Vec<_>>());

    assert!(run.wait().await.is_success());
    let late = run.subscribe().collect().await;

    let early = early.await.unwrap();
    let streamed = streamed.await.unwrap();

    assert_eq!(early, late);
    assert_eq!(streamed, late);
    assert_eq!(late, run.events());
    assert!(late.iter().any(|e| e.stage_id.as_str() == "C" && e.progress == 75));
}

#[tokio::test]
async fn test_subscription_ends_after_terminal_outcome() {
    let agent = ScriptedAgent::new().into_shared();
    let scheduler = Scheduler::new(validated(diamond()), bind_all(agent), SchedulerConfig::default()).unwrap();
    let run = scheduler.start(
        Arc::new("talk.mp4".to_string()),
        CollectingAggregator::requiring(&[]).into_shared(),
    );

    let mut sub = run.subscribe();
    let mut completed = 0;
    while let Some(event) = sub.next().await {
        if event.status == StageStatus::Completed {
            completed += 1;
        }
    }

    assert_eq!(completed, 4);
    assert!(run.is_finished());
    assert!(sub.next().await.is_none());
}
