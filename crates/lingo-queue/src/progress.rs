//! Append-only progress log per task, with poll and push consumption.
//!
//! Every progress write in the system goes through [`ProgressStore::record`],
//! which assigns sequence numbers and enforces ordering: percent is clamped
//! to `[0, 100]` and never decreases within an attempt, a new attempt may
//! restart lower, and nothing is accepted after a terminal event.

use std::collections::HashMap;
use std::pin::Pin;

use chrono::Utc;
use futures_util::Stream;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use lingo_models::{ProgressEvent, ProgressUpdate, TaskId};

use crate::error::{ProgressError, ProgressResult};
use crate::relay::RedisProgressRelay;

/// Default capacity of the push channel shared by all subscribers.
pub const DEFAULT_PUSH_BUFFER: usize = 1024;

#[derive(Debug, Default)]
struct Log {
    events: Vec<ProgressEvent>,
    next_seq: u64,
    attempt: u32,
    floor: f64,
    terminal: bool,
}

/// Shared progress store.
pub struct ProgressStore {
    logs: RwLock<HashMap<TaskId, Log>>,
    tx: broadcast::Sender<ProgressEvent>,
    relay: Option<RedisProgressRelay>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(DEFAULT_PUSH_BUFFER)
    }
}

impl ProgressStore {
    pub fn new(push_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(push_buffer.max(1));
        Self {
            logs: RwLock::new(HashMap::new()),
            tx,
            relay: None,
        }
    }

    /// Republish every recorded event through Redis.
    pub fn with_relay(mut self, relay: RedisProgressRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Append an event and return it as stored (sequence, timestamp and
    /// clamped percent filled in).
    pub async fn record(
        &self,
        task_id: &TaskId,
        update: ProgressUpdate,
    ) -> ProgressResult<ProgressEvent> {
        let event = {
            let mut logs = self.logs.write().await;
            let log = logs.entry(task_id.clone()).or_default();

            if log.terminal {
                return Err(ProgressError::AfterTerminal(task_id.clone()));
            }
            if update.attempt < log.attempt {
                return Err(ProgressError::StaleAttempt {
                    task_id: task_id.clone(),
                    attempt: update.attempt,
                    current: log.attempt,
                });
            }

            let requested = if update.percent.is_finite() {
                update.percent.clamp(0.0, 100.0)
            } else {
                log.floor
            };
            let percent = if update.attempt > log.attempt {
                log.attempt = update.attempt;
                requested
            } else {
                requested.max(log.floor)
            };
            log.floor = percent;
            log.next_seq += 1;

            let event = ProgressEvent {
                task_id: task_id.clone(),
                sequence_number: log.next_seq,
                timestamp: Utc::now(),
                attempt: update.attempt,
                state: update.state,
                stage: update.stage,
                chunk_index: update.chunk_index,
                percent,
                message: update.message,
            };
            log.terminal = event.is_terminal();
            log.events.push(event.clone());
            event
        };

        debug!(
            task_id = %task_id,
            seq = event.sequence_number,
            state = %event.state,
            percent = event.percent,
            "Progress recorded"
        );

        // No receivers is not an error.
        let _ = self.tx.send(event.clone());

        if let Some(relay) = &self.relay {
            let relay = relay.clone();
            let relayed = event.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.publish(&relayed).await {
                    warn!(task_id = %relayed.task_id, "Progress relay failed: {}", e);
                }
            });
        }

        Ok(event)
    }

    pub async fn latest(&self, task_id: &TaskId) -> Option<ProgressEvent> {
        self.logs
            .read()
            .await
            .get(task_id)
            .and_then(|log| log.events.last().cloned())
    }

    /// Events with `sequence_number > after`, in order.
    pub async fn since(&self, task_id: &TaskId, after: u64) -> Vec<ProgressEvent> {
        self.logs
            .read()
            .await
            .get(task_id)
            .map(|log| {
                log.events
                    .iter()
                    .filter(|e| e.sequence_number > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn events(&self, task_id: &TaskId) -> Vec<ProgressEvent> {
        self.since(task_id, 0).await
    }

    /// Receive events for one task as they are recorded.
    pub fn subscribe(&self, task_id: &TaskId) -> ProgressSubscription {
        ProgressSubscription {
            task_id: task_id.clone(),
            rx: self.tx.subscribe(),
            last_seq: 0,
        }
    }

    /// Forget a task's log.
    pub async fn purge(&self, task_id: &TaskId) -> bool {
        self.logs.write().await.remove(task_id).is_some()
    }
}

/// Push subscription for one task.
///
/// Delivery is best effort: a lagging subscriber skips what it missed and
/// can recover it with [`ProgressStore::since`] using [`Self::last_seq`].
pub struct ProgressSubscription {
    task_id: TaskId,
    rx: broadcast::Receiver<ProgressEvent>,
    last_seq: u64,
}

impl ProgressSubscription {
    /// Next event for this task, or `None` when the store is gone.
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.task_id == self.task_id => {
                    self.last_seq = event.sequence_number;
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(task_id = %self.task_id, skipped, "Progress subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Sequence number of the last event delivered.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Adapt into a stream that ends after the task's terminal event.
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = ProgressEvent> + Send>> {
        let stream = futures_util::stream::unfold(Some(self), |sub| async move {
            let mut sub = sub?;
            let event = sub.next().await?;
            let next = if event.is_terminal() { None } else { Some(sub) };
            Some((event, next))
        });
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use lingo_models::{ChunkStatus, TaskState};

    fn id() -> TaskId {
        TaskId::from_string("task-1")
    }

    #[tokio::test]
    async fn test_sequence_numbers_start_at_one() {
        let store = ProgressStore::default();
        let a = store
            .record(&id(), ProgressUpdate::lifecycle(0, TaskState::Pending, 0.0, "queued"))
            .await
            .unwrap();
        let b = store
            .record(&id(), ProgressUpdate::lifecycle(1, TaskState::Started, 0.0, "started"))
            .await
            .unwrap();
        assert_eq!(a.sequence_number, 1);
        assert_eq!(b.sequence_number, 2);
        assert_eq!(store.latest(&id()).await.unwrap(), b);
        assert_eq!(store.since(&id(), 1).await, vec![b]);
    }

    #[tokio::test]
    async fn test_percent_never_decreases_within_attempt() {
        let store = ProgressStore::default();
        let t = id();
        store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Transcribing, 1, 40.0, "a"))
            .await
            .unwrap();
        let low = store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Filtering, 1, 10.0, "b"))
            .await
            .unwrap();
        assert_eq!(low.percent, 40.0);

        let clamped = store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Filtering, 1, 250.0, "c"))
            .await
            .unwrap();
        assert_eq!(clamped.percent, 100.0);
    }

    #[tokio::test]
    async fn test_new_attempt_restarts_and_stale_attempt_rejected() {
        let store = ProgressStore::default();
        let t = id();
        store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Translating, 1, 80.0, "a"))
            .await
            .unwrap();
        let restarted = store
            .record(&t, ProgressUpdate::lifecycle(2, TaskState::Started, 50.0, "retry"))
            .await
            .unwrap();
        assert_eq!(restarted.percent, 50.0);

        let err = store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Finalized, 1, 100.0, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::StaleAttempt { .. }));
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let store = ProgressStore::default();
        let t = id();
        store
            .record(&t, ProgressUpdate::lifecycle(1, TaskState::Success, 100.0, "done"))
            .await
            .unwrap();
        let err = store
            .record(&t, ProgressUpdate::stage(1, ChunkStatus::Translating, 1, 100.0, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::AfterTerminal(_)));
    }

    #[tokio::test]
    async fn test_subscription_filters_by_task_and_ends_on_terminal() {
        let store = ProgressStore::default();
        let t = id();
        let other = TaskId::from_string("other");
        let stream = store.subscribe(&t).into_stream();

        store
            .record(&other, ProgressUpdate::lifecycle(0, TaskState::Pending, 0.0, "x"))
            .await
            .unwrap();
        store
            .record(&t, ProgressUpdate::lifecycle(1, TaskState::Started, 0.0, "s"))
            .await
            .unwrap();
        store
            .record(&t, ProgressUpdate::lifecycle(1, TaskState::Failure, 0.0, "f"))
            .await
            .unwrap();

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.task_id == t));
        assert_eq!(events[1].state, TaskState::Failure);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers_with_since() {
        let store = ProgressStore::new(2);
        let t = id();
        let mut sub = store.subscribe(&t);
        for i in 0..5 {
            store
                .record(&t, ProgressUpdate::lifecycle(1, TaskState::Progress, i as f64, "p"))
                .await
                .unwrap();
        }

        let got = sub.next().await.unwrap();
        assert!(got.sequence_number > 1);
        let missed = store.since(&t, 0).await;
        assert_eq!(missed.len(), 5);
    }
}
