//! Progress/Status Publisher
//!
//! Each run owns an append-only event log. The coordinator is the single
//! writer; subscribers read through independent cursors, so every
//! subscriber sees the complete, identically ordered sequence no matter
//! when it attaches. The log is closed once the run reaches a terminal
//! outcome, which ends every subscription.

use crate::types::{RunId, StageId, StageStatus};
use chrono::{DateTime, Utc};
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// One observable change of a stage's status or progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    /// Run the event belongs to
    pub run_id: RunId,
    /// Position in the run's event log, starting at 0
    pub sequence: u64,
    /// Stage that changed
    pub stage_id: StageId,
    /// Status after the change
    pub status: StageStatus,
    /// Progress after the change
    pub progress: u8,
    /// Failure cause for `Failed`/`Blocked`
    pub error: Option<String>,
    /// When the change was published
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LogInner {
    events: Vec<StateChangeEvent>,
    closed: bool,
}

/// Append-only event log for one run
#[derive(Debug)]
pub struct RunEventLog {
    run_id: RunId,
    inner: Mutex<LogInner>,
    version: watch::Sender<u64>,
}

impl RunEventLog {
    /// Create an empty, open log
    #[must_use]
    pub fn new(run_id: RunId) -> Arc<Self> {
        let (version, _) = watch::channel(0);
        Arc::new(Self {
            run_id,
            inner: Mutex::new(LogInner::default()),
            version,
        })
    }

    /// Run this log belongs to
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Append an event and wake subscribers
    ///
    /// Events published after `close` are dropped.
    pub(crate) fn publish(
        &self,
        stage_id: &StageId,
        status: StageStatus,
        progress: u8,
        error: Option<String>,
    ) -> Option<u64> {
        let sequence = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return None;
            }
            let sequence = inner.events.len() as u64;
            inner.events.push(StateChangeEvent {
                run_id: self.run_id,
                sequence,
                stage_id: stage_id.clone(),
                status,
                progress,
                error,
                timestamp: Utc::now(),
            });
            sequence
        };

        tracing::trace!(run = %self.run_id, stage = %stage_id, %status, progress, sequence, "state change published");
        self.version.send_replace(sequence + 1);
        Some(sequence)
    }

    /// Close the log; subscriptions end after draining
    pub(crate) fn close(&self) {
        let len = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.events.len() as u64
        };
        self.version.send_replace(len + 1);
    }

    /// Check whether the run reached a terminal outcome
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Copy of every event published so far
    #[must_use]
    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.inner.lock().events.clone()
    }

    /// Number of events published so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    /// True if nothing was published yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attach a subscriber that replays from the first event
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> EventSubscription {
        EventSubscription {
            log: Arc::clone(self),
            cursor: 0,
            wake: self.version.subscribe(),
        }
    }
}

/// Lazy, finite sequence of a run's state changes
#[derive(Debug)]
pub struct EventSubscription {
    log: Arc<RunEventLog>,
    cursor: usize,
    wake: watch::Receiver<u64>,
}

impl EventSubscription {
    /// Next event, waiting if necessary; `None` once the run is over and
    /// every event was delivered
    pub async fn next(&mut self) -> Option<StateChangeEvent> {
        loop {
            self.wake.borrow_and_update();
            {
                let inner = self.log.inner.lock();
                if let Some(event) = inner.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if inner.closed {
                    return None;
                }
            }
            // The sender lives in the log we hold, so this only errors if
            // the log is being torn down.
            if self.wake.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Next event if one is already available
    pub fn try_next(&mut self) -> Option<StateChangeEvent> {
        let inner = self.log.inner.lock();
        let event = inner.events.get(self.cursor).cloned();
        if event.is_some() {
            self.cursor += 1;
        }
        event
    }

    /// Drain every remaining event until the run ends
    pub async fn collect(mut self) -> Vec<StateChangeEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.next().await {
            out.push(event);
        }
        out
    }

    /// Adapt into a `futures::Stream`
    pub fn into_stream(self) -> impl Stream<Item = StateChangeEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn late_subscriber_replays_everything() {
        let log = RunEventLog::new(RunId::new());
        let stage = StageId::from("A");

        log.publish(&stage, StageStatus::Pending, 0, None);
        log.publish(&stage, StageStatus::Running, 0, None);

        let sub = log.subscribe();
        log.publish(&stage, StageStatus::Completed, 100, None);
        log.close();

        let events = sub.collect().await;
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![StageStatus::Pending, StageStatus::Running, StageStatus::Completed]
        );
        assert_eq!(events[2].sequence, 2);
    }

    #[tokio::test]
    async fn subscriber_waits_for_publish() {
        let log = RunEventLog::new(RunId::new());
        let mut sub = log.subscribe();

        let writer = Arc::clone(&log);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.publish(&"A".into(), StageStatus::Pending, 0, None);
            writer.close();
        });

        let first = sub.next().await.unwrap();
        assert_eq!(first.stage_id.as_str(), "A");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_after_close_is_dropped() {
        let log = RunEventLog::new(RunId::new());
        log.close();
        assert!(log.publish(&"A".into(), StageStatus::Pending, 0, None).is_none());
        assert!(log.is_empty());

        let events: Vec<_> = log.subscribe().into_stream().collect().await;
        assert!(events.is_empty());
    }
}
