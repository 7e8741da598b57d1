//! Task registry: the orchestrator-owned record of every task.
//!
//! All mutations after submission carry the caller's lease token. The
//! registry remembers which token owns each task and rejects writes from any
//! other token, so a worker whose lease expired can never overwrite the
//! record of the worker that re-acquired the task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use lingo_models::{
    Task, TaskError, TaskId, TaskInput, TaskKind, TaskResult, TaskState, TaskStatus,
};

use crate::error::{RegistryError, RegistryResult};
use crate::queue::LeaseToken;

struct Entry {
    task: Task,
    lease: Option<LeaseToken>,
    cancel: CancellationToken,
    message: String,
    status_tx: watch::Sender<TaskStatus>,
}

impl Entry {
    fn publish(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.task.updated_at = Utc::now();
        self.status_tx
            .send_replace(TaskStatus::from_task(&self.task, self.message.clone()));
    }

    fn check_lease(&self, token: LeaseToken) -> RegistryResult<()> {
        if self.lease != Some(token) {
            return Err(RegistryError::StaleLease(self.task.id.clone()));
        }
        Ok(())
    }

    fn finish(&mut self, state: TaskState, message: impl Into<String>) {
        self.task.state = state;
        self.task.finished_at = Some(Utc::now());
        self.lease = None;
        self.publish(message);
    }
}

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone)]
pub struct AttemptStart {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub input: Arc<TaskInput>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Progress the attempt starts from
    pub committed_progress: f64,
    pub cancel: CancellationToken,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task never started and is now FAILURE/cancelled
    Cancelled,
    /// A worker owns the task and will stop at the next stage boundary
    Requested,
    /// The task had already finished
    AlreadyTerminal,
}

/// Shared map of task records.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<TaskId, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly submitted task.
    pub async fn insert(&self, task: Task) {
        let status = TaskStatus::from_task(&task, "queued");
        let (status_tx, _) = watch::channel(status);
        let entry = Entry {
            lease: None,
            cancel: CancellationToken::new(),
            message: "queued".to_string(),
            status_tx,
            task,
        };
        self.entries
            .write()
            .await
            .insert(entry.task.id.clone(), entry);
    }

    /// Drop a task entirely (submission rollback, retention purge).
    pub async fn remove(&self, task_id: &TaskId) -> Option<Task> {
        self.entries.write().await.remove(task_id).map(|e| e.task)
    }

    pub async fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.entries.read().await.get(task_id).map(|e| e.task.clone())
    }

    pub async fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.entries
            .read()
            .await
            .get(task_id)
            .map(|e| e.status_tx.borrow().clone())
    }

    /// Push channel of status snapshots. Intermediate values may be skipped;
    /// the latest one is always observable.
    pub async fn watch(&self, task_id: &TaskId) -> Option<watch::Receiver<TaskStatus>> {
        self.entries
            .read()
            .await
            .get(task_id)
            .map(|e| e.status_tx.subscribe())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Claim the task for a new attempt with `token`.
    ///
    /// A task left in STARTED or PROGRESS by a crashed worker is claimable:
    /// the queue only hands out a new token after the old lease expired.
    pub async fn begin_attempt(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
    ) -> RegistryResult<AttemptStart> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;

        if entry.task.state.is_terminal() {
            return Err(RegistryError::Terminal {
                task_id: task_id.clone(),
                state: entry.task.state,
            });
        }
        if entry.cancel.is_cancelled() {
            entry.task.error = Some(TaskError::cancelled());
            entry.finish(TaskState::Failure, "cancelled");
            return Err(RegistryError::Cancelled(task_id.clone()));
        }

        entry.lease = Some(token);
        entry.task.attempt += 1;
        entry.task.state = TaskState::Started;
        entry.task.progress = entry.task.committed_progress;
        let attempt = entry.task.attempt;
        entry.publish(format!("attempt {} started", attempt));

        debug!(task_id = %task_id, attempt, token = %token, "Attempt claimed");
        Ok(AttemptStart {
            task_id: task_id.clone(),
            kind: entry.task.kind,
            input: entry.task.input.clone(),
            attempt,
            committed_progress: entry.task.committed_progress,
            cancel: entry.cancel.clone(),
        })
    }

    /// Record in-attempt progress.
    pub async fn update_progress(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
        percent: f64,
        message: &str,
    ) -> RegistryResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;
        entry.check_lease(token)?;

        entry.task.state = TaskState::Progress;
        entry.task.progress = percent.clamp(0.0, 100.0);
        entry.publish(message);
        Ok(())
    }

    /// Advance the committed boundary after a chunk commit.
    pub async fn commit_progress(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
        percent: f64,
    ) -> RegistryResult<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;
        entry.check_lease(token)?;

        entry.task.committed_progress = entry.task.committed_progress.max(percent.clamp(0.0, 100.0));
        Ok(())
    }

    pub async fn complete(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
        result: TaskResult,
    ) -> RegistryResult<TaskStatus> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;
        entry.check_lease(token)?;

        entry.task.result = Some(result);
        entry.task.error = None;
        entry.task.progress = 100.0;
        entry.task.committed_progress = 100.0;
        entry.finish(TaskState::Success, "completed");
        info!(task_id = %task_id, attempt = entry.task.attempt, "Task succeeded");
        let status = entry.status_tx.borrow().clone();
        Ok(status)
    }

    pub async fn fail(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
        error: TaskError,
    ) -> RegistryResult<TaskStatus> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;
        entry.check_lease(token)?;

        let message = error.message.clone();
        entry.task.error = Some(error);
        entry.finish(TaskState::Failure, message);
        let status = entry.status_tx.borrow().clone();
        Ok(status)
    }

    /// Park the task in RETRY until its delayed queue entry is leased again.
    ///
    /// Progress stays where the failed attempt left it; the next
    /// `begin_attempt` rewinds it to the committed boundary.
    pub async fn mark_retry(
        &self,
        task_id: &TaskId,
        token: LeaseToken,
        error: TaskError,
        message: &str,
    ) -> RegistryResult<TaskStatus> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;
        entry.check_lease(token)?;

        entry.task.state = TaskState::Retry;
        entry.task.error = Some(error);
        entry.lease = None;
        entry.publish(message);
        let status = entry.status_tx.borrow().clone();
        Ok(status)
    }

    /// Cancel a task. `dequeued_waiting` is true when the caller already
    /// removed the task's waiting entry from the queue.
    pub async fn cancel(
        &self,
        task_id: &TaskId,
        dequeued_waiting: bool,
    ) -> RegistryResult<CancelOutcome> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(task_id)
            .ok_or_else(|| RegistryError::NotFound(task_id.clone()))?;

        if entry.task.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        entry.cancel.cancel();

        if dequeued_waiting {
            entry.task.error = Some(TaskError::cancelled());
            entry.finish(TaskState::Failure, "cancelled");
            info!(task_id = %task_id, "Cancelled waiting task");
            Ok(CancelOutcome::Cancelled)
        } else {
            info!(task_id = %task_id, state = %entry.task.state, "Cancellation requested");
            Ok(CancelOutcome::Requested)
        }
    }

    /// Remove terminal tasks that finished more than `retention` ago.
    pub async fn purge_expired(&self, retention: std::time::Duration) -> Vec<TaskId> {
        let retention =
            ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let cutoff = Utc::now() - retention;
        let mut entries = self.entries.write().await;
        let expired: Vec<TaskId> = entries
            .values()
            .filter(|e| e.task.finished_at.is_some_and(|at| at <= cutoff))
            .map(|e| e.task.id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_models::ErrorKind;
    use uuid::Uuid;

    fn token() -> LeaseToken {
        LeaseToken(Uuid::new_v4())
    }

    async fn registry_with_task() -> (TaskRegistry, TaskId) {
        let registry = TaskRegistry::new();
        let input = TaskInput::new("vid", "/media/a.mp4", 0.0, 60.0, "user");
        let task = Task::new(TaskKind::ChunkTranscription, Arc::new(input));
        let id = task.id.clone();
        registry.insert(task).await;
        (registry, id)
    }

    #[tokio::test]
    async fn test_attempt_lifecycle() {
        let (registry, id) = registry_with_task().await;
        let t = token();

        let start = registry.begin_attempt(&id, t).await.unwrap();
        assert_eq!(start.attempt, 1);
        assert_eq!(registry.get(&id).await.unwrap().state, TaskState::Started);

        registry.update_progress(&id, t, 40.0, "working").await.unwrap();
        let status = registry
            .complete(&id, t, TaskResult::default())
            .await
            .unwrap();
        assert_eq!(status.state, TaskState::Success);
        assert_eq!(status.progress, 100.0);
        assert!(status.result.is_some());
    }

    #[tokio::test]
    async fn test_stale_lease_is_fenced_off() {
        let (registry, id) = registry_with_task().await;
        let old = token();
        let new = token();

        registry.begin_attempt(&id, old).await.unwrap();
        // Old lease expired, another worker re-acquired the task.
        let start = registry.begin_attempt(&id, new).await.unwrap();
        assert_eq!(start.attempt, 2);

        let err = registry
            .update_progress(&id, old, 90.0, "late write")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::StaleLease(_)));
        assert!(registry
            .fail(&id, old, TaskError::new(ErrorKind::Transient, "x"))
            .await
            .is_err());
        assert_eq!(registry.get(&id).await.unwrap().state, TaskState::Started);
    }

    #[tokio::test]
    async fn test_terminal_writes_return_published_status() {
        let (registry, id) = registry_with_task().await;
        let rx = registry.watch(&id).await.unwrap();
        let t = token();
        registry.begin_attempt(&id, t).await.unwrap();

        let status = registry
            .fail(&id, t, TaskError::new(ErrorKind::Permanent, "bad codec"))
            .await
            .unwrap();
        assert_eq!(status.state, TaskState::Failure);
        assert_eq!(status.error.as_ref().map(|e| e.kind), Some(ErrorKind::Permanent));
        assert_eq!(*rx.borrow(), status);
        assert_eq!(registry.status(&id).await, Some(status));
    }

    #[tokio::test]
    async fn test_terminal_is_immutable() {
        let (registry, id) = registry_with_task().await;
        let t = token();
        registry.begin_attempt(&id, t).await.unwrap();
        registry
            .fail(&id, t, TaskError::new(ErrorKind::Permanent, "bad codec"))
            .await
            .unwrap();

        assert!(matches!(
            registry.begin_attempt(&id, token()).await,
            Err(RegistryError::Terminal { .. })
        ));
        assert_eq!(
            registry.cancel(&id, false).await.unwrap(),
            CancelOutcome::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn test_next_attempt_rewinds_to_committed_progress() {
        let (registry, id) = registry_with_task().await;
        let t = token();
        registry.begin_attempt(&id, t).await.unwrap();
        registry.update_progress(&id, t, 50.0, "chunk 1 done").await.unwrap();
        registry.commit_progress(&id, t, 50.0).await.unwrap();
        registry.update_progress(&id, t, 70.0, "chunk 2").await.unwrap();
        let parked = registry
            .mark_retry(&id, t, TaskError::new(ErrorKind::Transient, "timeout"), "retrying")
            .await
            .unwrap();

        assert_eq!(parked.state, TaskState::Retry);
        assert_eq!(parked.progress, 70.0);
        assert_eq!(registry.status(&id).await, Some(parked));

        let next = registry.begin_attempt(&id, token()).await.unwrap();
        assert_eq!(next.committed_progress, 50.0);
        assert_eq!(registry.get(&id).await.unwrap().progress, 50.0);
    }

    #[tokio::test]
    async fn test_cancel_waiting_task() {
        let (registry, id) = registry_with_task().await;
        let outcome = registry.cancel(&id, true).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        let status = registry.status(&id).await.unwrap();
        assert_eq!(status.state, TaskState::Failure);
        assert_eq!(status.attempt, 0);
        assert_eq!(status.error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_leased_before_start() {
        let (registry, id) = registry_with_task().await;
        assert_eq!(
            registry.cancel(&id, false).await.unwrap(),
            CancelOutcome::Requested
        );
        assert!(matches!(
            registry.begin_attempt(&id, token()).await,
            Err(RegistryError::Cancelled(_))
        ));
        assert_eq!(registry.get(&id).await.unwrap().state, TaskState::Failure);
    }

    #[tokio::test]
    async fn test_watch_sees_latest_status() {
        let (registry, id) = registry_with_task().await;
        let mut rx = registry.watch(&id).await.unwrap();
        let t = token();
        registry.begin_attempt(&id, t).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, TaskState::Started);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_finished_tasks() {
        let (registry, id) = registry_with_task().await;
        let t = token();
        registry.begin_attempt(&id, t).await.unwrap();
        registry.complete(&id, t, TaskResult::default()).await.unwrap();

        assert!(registry
            .purge_expired(std::time::Duration::from_secs(3600))
            .await
            .is_empty());
        let purged = registry.purge_expired(std::time::Duration::ZERO).await;
        assert_eq!(purged, vec![id.clone()]);
        assert!(registry.get(&id).await.is_none());
    }
}
