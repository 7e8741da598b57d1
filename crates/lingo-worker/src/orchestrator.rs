//! Orchestrator facade: submission, status, cancellation and push updates.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, Stream};
use tracing::info;

use lingo_ai::EngineFactory;
use lingo_models::{ProgressEvent, TaskId, TaskInput, TaskKind, TaskStatus};
use lingo_queue::{
    CancelAck, DispatchError, DispatchResult, Dispatcher, LeaseQueue, ProgressStore,
    ProgressSubscription, RedisProgressRelay, TaskRegistry,
};
use lingo_store::PersistenceGateway;

use crate::config::WorkerConfig;
use crate::executor::WorkerPool;
use crate::metrics;
use crate::pipeline::PipelineRunner;

/// Stream of status snapshots for one task.
pub type StatusStream = Pin<Box<dyn Stream<Item = TaskStatus> + Send>>;

pub struct Orchestrator {
    queue: Arc<LeaseQueue>,
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressStore>,
    dispatcher: Dispatcher,
    pool: WorkerPool,
}

impl Orchestrator {
    pub fn new(
        config: WorkerConfig,
        gateway: Arc<dyn PersistenceGateway>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        Self::build(config, gateway, engines, None)
    }

    /// Like [`Orchestrator::new`], also republishing progress through Redis.
    pub fn with_progress_relay(
        config: WorkerConfig,
        gateway: Arc<dyn PersistenceGateway>,
        engines: Arc<dyn EngineFactory>,
        relay: RedisProgressRelay,
    ) -> Self {
        Self::build(config, gateway, engines, Some(relay))
    }

    fn build(
        config: WorkerConfig,
        gateway: Arc<dyn PersistenceGateway>,
        engines: Arc<dyn EngineFactory>,
        relay: Option<RedisProgressRelay>,
    ) -> Self {
        let queue = Arc::new(LeaseQueue::new(config.queue.clone()));
        let registry = Arc::new(TaskRegistry::new());
        let mut progress = ProgressStore::new(config.progress_buffer);
        if let Some(relay) = relay {
            progress = progress.with_relay(relay);
        }
        let progress = Arc::new(progress);

        let runner = Arc::new(PipelineRunner::new(gateway, &config));
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&progress),
        );
        let pool = WorkerPool::new(
            config,
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&progress),
            runner,
            engines,
        );

        Self {
            queue,
            registry,
            progress,
            dispatcher,
            pool,
        }
    }

    /// Start the worker pool.
    pub async fn start(&self) {
        self.pool.start().await;
    }

    /// Enqueue a task. Returns as soon as the task is recorded and queued.
    pub async fn submit_task(&self, kind: TaskKind, input: TaskInput) -> DispatchResult<TaskId> {
        match self.dispatcher.submit(kind, input).await {
            Ok(task_id) => {
                metrics::record_submitted(kind.as_str());
                Ok(task_id)
            }
            Err(e) => {
                let reason = match &e {
                    DispatchError::Validation(_) => "validation",
                    DispatchError::QueueSaturated { .. } => "queue_saturated",
                    DispatchError::ShuttingDown => "shutting_down",
                    _ => "other",
                };
                metrics::record_rejected(reason);
                Err(e)
            }
        }
    }

    pub async fn get_status(&self, task_id: &TaskId) -> DispatchResult<TaskStatus> {
        self.dispatcher.status(task_id).await
    }

    pub async fn cancel_task(&self, task_id: &TaskId) -> DispatchResult<CancelAck> {
        let ack = self.dispatcher.cancel(task_id).await?;
        info!(task_id = %task_id, outcome = ?ack.outcome, "Cancel requested");
        Ok(ack)
    }

    /// Push channel of status snapshots. Yields the current status first and
    /// ends after a terminal one. Intermediate snapshots may be coalesced;
    /// `get_status` or the progress log fill any gap.
    pub async fn subscribe(&self, task_id: &TaskId) -> Option<StatusStream> {
        let rx = self.registry.watch(task_id).await?;
        let updates = stream::unfold((rx, true, false), |(mut rx, first, done)| async move {
            if done {
                return None;
            }
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let status = rx.borrow_and_update().clone();
            let done = status.is_terminal();
            Some((status, (rx, false, done)))
        });
        Some(Box::pin(updates))
    }

    /// Wait until the task reaches SUCCESS or FAILURE. `None` on timeout or
    /// unknown task.
    pub async fn wait_for_terminal(
        &self,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Option<TaskStatus> {
        let mut rx = self.registry.watch(task_id).await?;
        let wait = async move {
            rx.wait_for(|status| status.is_terminal())
                .await
                .map(|status| status.clone())
                .ok()
        };
        tokio::time::timeout(timeout, wait).await.ok().flatten()
    }

    /// Every progress event recorded for the task, in sequence order.
    pub async fn progress_events(&self, task_id: &TaskId) -> Vec<ProgressEvent> {
        self.progress.events(task_id).await
    }

    pub async fn latest_progress(&self, task_id: &TaskId) -> Option<ProgressEvent> {
        self.progress.latest(task_id).await
    }

    /// Events with a sequence number greater than `after`.
    pub async fn progress_since(&self, task_id: &TaskId, after: u64) -> Vec<ProgressEvent> {
        self.progress.since(task_id, after).await
    }

    pub fn subscribe_progress(&self, task_id: &TaskId) -> ProgressSubscription {
        self.progress.subscribe(task_id)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    /// Close the queue and wait for in-flight attempts.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use lingo_ai::{AiResult, AiStage};
    use lingo_models::{Segment, TaskState, TranslatedSegment};
    use lingo_store::MemoryGateway;

    struct EchoEngine;

    #[async_trait::async_trait]
    impl AiStage for EchoEngine {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn transcribe(
            &self,
            _video_path: &str,
            start: f64,
            end: f64,
            _language: &str,
        ) -> AiResult<Vec<Segment>> {
            Ok(vec![Segment {
                index: 0,
                start,
                end,
                text: "Photosynthesis converts sunlight".into(),
            }])
        }

        async fn translate(
            &self,
            segments: &[Segment],
            _source_lang: &str,
            _target_lang: &str,
        ) -> AiResult<Vec<TranslatedSegment>> {
            Ok(segments
                .iter()
                .map(|s| TranslatedSegment {
                    index: s.index,
                    start: s.start,
                    end: s.end,
                    source_text: s.text.clone(),
                    translated_text: s.text.to_uppercase(),
                })
                .collect())
        }
    }

    struct EchoFactory;

    impl EngineFactory for EchoFactory {
        fn build(&self, _input: &TaskInput) -> AiResult<Box<dyn AiStage>> {
            Ok(Box::new(EchoEngine))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            WorkerConfig::default(),
            Arc::new(MemoryGateway::new()),
            Arc::new(EchoFactory),
        )
    }

    #[tokio::test]
    async fn test_subscribe_streams_until_terminal() {
        let orchestrator = orchestrator();
        let input = TaskInput::new("vid", "/media/a.mp4", 0.0, 30.0, "user");
        let task_id = orchestrator
            .submit_task(TaskKind::ChunkTranscription, input)
            .await
            .unwrap();

        let updates = orchestrator.subscribe(&task_id).await.unwrap();
        orchestrator.start().await;
        let statuses: Vec<TaskStatus> = updates.collect().await;

        assert_eq!(statuses.first().map(|s| s.state), Some(TaskState::Pending));
        let last = statuses.last().unwrap();
        assert_eq!(last.state, TaskState::Success);
        assert_eq!(last.progress, 100.0);
        assert!(last.result.is_some());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_progress_log_is_pollable() {
        let orchestrator = orchestrator();
        let input = TaskInput::new("vid", "/media/a.mp4", 0.0, 30.0, "user");
        let task_id = orchestrator
            .submit_task(TaskKind::VocabularyExtraction, input)
            .await
            .unwrap();

        let pending = orchestrator.latest_progress(&task_id).await.unwrap();
        assert_eq!(pending.state, TaskState::Pending);
        assert_eq!(pending.sequence_number, 1);

        orchestrator.start().await;
        let status = orchestrator
            .wait_for_terminal(&task_id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(status.state, TaskState::Success);

        let rest = orchestrator.progress_since(&task_id, 1).await;
        assert!(rest.iter().all(|e| e.sequence_number > 1));
        assert_eq!(rest.first().map(|e| e.state), Some(TaskState::Started));
        assert_eq!(
            orchestrator.latest_progress(&task_id).await.map(|e| e.state),
            Some(TaskState::Success)
        );
        assert_eq!(orchestrator.progress_events(&task_id).await.len(), rest.len() + 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let orchestrator = orchestrator();
        let missing = TaskId::from_string("missing");
        assert!(matches!(
            orchestrator.get_status(&missing).await,
            Err(DispatchError::NotFound(_))
        ));
        assert!(orchestrator.subscribe(&missing).await.is_none());
        assert!(orchestrator
            .wait_for_terminal(&missing, Duration::from_millis(10))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_input() {
        let orchestrator = orchestrator();
        let input = TaskInput::new("vid", "/media/a.mp4", 30.0, 10.0, "user");
        let err = orchestrator
            .submit_task(TaskKind::ChunkTranscription, input)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(orchestrator.queue_len().await, 0);
    }
}
