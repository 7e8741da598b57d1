//! Bounded in-process task queue with leases.
//!
//! A dequeued entry is leased to one worker until it is acked, re-scheduled,
//! or its visibility timeout passes. An expired lease puts the entry back at
//! the front of the queue and the next dequeue hands out a fresh token, so a
//! crashed worker's task is re-run (at-least-once).

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lingo_models::TaskId;

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Max entries (ready, delayed and leased together)
    pub capacity: usize,
    /// How long a lease lives without a heartbeat
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            capacity: std::env::var("LINGO_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|c: &usize| *c > 0)
                .unwrap_or(1024),
            visibility_timeout: Duration::from_secs(
                std::env::var("LINGO_VISIBILITY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// Unique token identifying one lease of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(pub Uuid);

impl LeaseToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task leased to a worker.
#[derive(Debug, Clone)]
pub struct Lease {
    pub task_id: TaskId,
    pub token: LeaseToken,
    /// How many times this task has been handed out, including this one
    pub delivery: u32,
}

#[derive(Debug)]
struct Leased {
    token: LeaseToken,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<TaskId>,
    delayed: Vec<(Instant, TaskId)>,
    leased: HashMap<TaskId, Leased>,
    deliveries: HashMap<TaskId, u32>,
    closed: bool,
}

impl State {
    fn len(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.leased.len()
    }

    fn contains(&self, task_id: &TaskId) -> bool {
        self.leased.contains_key(task_id)
            || self.ready.contains(task_id)
            || self.delayed.iter().any(|(_, id)| id == task_id)
    }

    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, task_id) in self.delayed.drain(..due) {
            self.ready.push_back(task_id);
        }
    }

    fn reclaim_expired(&mut self, now: Instant) -> Vec<TaskId> {
        let expired: Vec<TaskId> = self
            .leased
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in &expired {
            if let Some(lease) = self.leased.remove(task_id) {
                warn!(task_id = %task_id, token = %lease.token, "Lease expired, requeueing");
            }
            self.ready.push_front(task_id.clone());
        }
        expired
    }

    fn next_wake(&self) -> Option<Instant> {
        let delayed = self.delayed.iter().map(|(at, _)| *at).min();
        let leased = self.leased.values().map(|l| l.deadline).min();
        match (delayed, leased) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn owned_by(&self, lease: &Lease) -> bool {
        self.leased
            .get(&lease.task_id)
            .is_some_and(|l| l.token == lease.token)
    }
}

/// Bounded lease queue shared by the dispatcher and all workers.
pub struct LeaseQueue {
    state: Mutex<State>,
    notify: Notify,
    config: QueueConfig,
}

impl LeaseQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a new task. Fails fast when the queue is full.
    pub async fn push(&self, task_id: TaskId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.len() >= self.config.capacity {
            return Err(QueueError::Saturated {
                capacity: self.config.capacity,
            });
        }
        if state.contains(&task_id) {
            debug!(task_id = %task_id, "Task already queued");
            return Ok(());
        }
        state.ready.push_back(task_id);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next task and lease it. Returns `None` once closed.
    pub async fn dequeue(&self) -> Option<Lease> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                let now = Instant::now();
                state.promote_due(now);
                state.reclaim_expired(now);

                if let Some(task_id) = state.ready.pop_front() {
                    let token = LeaseToken::new();
                    let delivery = {
                        let count = state.deliveries.entry(task_id.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    state.leased.insert(
                        task_id.clone(),
                        Leased {
                            token,
                            deadline: now + self.config.visibility_timeout,
                        },
                    );
                    debug!(task_id = %task_id, token = %token, delivery, "Task leased");
                    return Some(Lease {
                        task_id,
                        token,
                        delivery,
                    });
                }
                state.next_wake()
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = notified.as_mut() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Release a finished task.
    pub async fn ack(&self, lease: &Lease) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if !state.owned_by(lease) {
            return Err(QueueError::UnknownLease(lease.task_id.clone()));
        }
        state.leased.remove(&lease.task_id);
        state.deliveries.remove(&lease.task_id);
        Ok(())
    }

    /// Hand the task back to be leased again after `delay`.
    ///
    /// Never fails on capacity: the entry already counts against it.
    pub async fn retry_after(&self, lease: &Lease, delay: Duration) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if !state.owned_by(lease) {
            return Err(QueueError::UnknownLease(lease.task_id.clone()));
        }
        state.leased.remove(&lease.task_id);
        state
            .delayed
            .push((Instant::now() + delay, lease.task_id.clone()));
        drop(state);

        // Waiters recompute their wake-up deadline.
        self.notify.notify_one();
        Ok(())
    }

    /// Extend a live lease by another visibility timeout.
    pub async fn heartbeat(&self, lease: &Lease) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        match state.leased.get_mut(&lease.task_id) {
            Some(l) if l.token == lease.token => {
                l.deadline = Instant::now() + self.config.visibility_timeout;
                Ok(())
            }
            _ => Err(QueueError::UnknownLease(lease.task_id.clone())),
        }
    }

    /// Remove a task that is waiting (ready or delayed). Leased tasks stay.
    pub async fn remove(&self, task_id: &TaskId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.ready.len() + state.delayed.len();
        state.ready.retain(|id| id != task_id);
        state.delayed.retain(|(_, id)| id != task_id);
        let removed = state.ready.len() + state.delayed.len() < before;
        if removed {
            state.deliveries.remove(task_id);
        }
        removed
    }

    /// Requeue every lease past its deadline.
    pub async fn reclaim_expired(&self) -> Vec<TaskId> {
        let reclaimed = self.state.lock().await.reclaim_expired(Instant::now());
        for _ in &reclaimed {
            self.notify.notify_one();
        }
        reclaimed
    }

    /// Current lease holder of a task.
    pub async fn holder(&self, task_id: &TaskId) -> Option<LeaseToken> {
        self.state.lock().await.leased.get(task_id).map(|l| l.token)
    }

    /// Close the queue and wake every waiting worker.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
        info!("Queue closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Entries counted against capacity.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn queue(capacity: usize, visibility_secs: u64) -> LeaseQueue {
        LeaseQueue::new(QueueConfig {
            capacity,
            visibility_timeout: Duration::from_secs(visibility_secs),
        })
    }

    #[tokio::test]
    async fn test_fifo_lease_and_ack() {
        let q = queue(8, 60);
        let a = TaskId::from_string("a");
        let b = TaskId::from_string("b");
        assert_ok!(q.push(a.clone()).await);
        assert_ok!(q.push(b.clone()).await);

        let first = q.dequeue().await.unwrap();
        assert_eq!(first.task_id, a);
        assert_eq!(first.delivery, 1);
        assert_eq!(q.holder(&a).await, Some(first.token));

        assert_ok!(q.ack(&first).await);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn test_saturation_counts_leased_entries() {
        let q = queue(2, 60);
        q.push(TaskId::from_string("a")).await.unwrap();
        q.push(TaskId::from_string("b")).await.unwrap();
        let _lease = q.dequeue().await.unwrap();

        let err = q.push(TaskId::from_string("c")).await.unwrap_err();
        assert!(matches!(err, QueueError::Saturated { capacity: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_redelivered_with_new_token() {
        let q = queue(8, 30);
        let id = TaskId::from_string("a");
        q.push(id.clone()).await.unwrap();

        let first = q.dequeue().await.unwrap();
        // Nobody heartbeats; the next dequeue waits for the deadline.
        let second = q.dequeue().await.unwrap();
        assert_eq!(second.task_id, id);
        assert_eq!(second.delivery, 2);
        assert_ne!(first.token, second.token);

        // The crashed holder can no longer touch the entry.
        assert_err!(q.ack(&first).await);
        assert_err!(q.heartbeat(&first).await);
        assert_ok!(q.ack(&second).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_lease() {
        let q = queue(8, 30);
        q.push(TaskId::from_string("a")).await.unwrap();
        let lease = q.dequeue().await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        q.heartbeat(&lease).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        assert!(q.reclaim_expired().await.is_empty());
        assert_eq!(q.holder(&lease.task_id).await, Some(lease.token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_delays_redelivery() {
        let q = queue(8, 600);
        q.push(TaskId::from_string("a")).await.unwrap();
        let lease = q.dequeue().await.unwrap();

        let start = Instant::now();
        q.retry_after(&lease, Duration::from_secs(4)).await.unwrap();
        let again = q.dequeue().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(again.delivery, 2);
    }

    #[tokio::test]
    async fn test_remove_waiting_task() {
        let q = queue(8, 60);
        let id = TaskId::from_string("a");
        q.push(id.clone()).await.unwrap();
        assert!(q.remove(&id).await);
        assert!(!q.remove(&id).await);
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let q = Arc::new(queue(8, 60));
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.dequeue().await })
            })
            .collect();
        tokio::task::yield_now().await;

        q.close().await;
        for w in waiters {
            assert!(w.await.unwrap().is_none());
        }
        assert!(matches!(
            q.push(TaskId::from_string("late")).await,
            Err(QueueError::Closed)
        ));
    }
}
