//! Worker pool.
//!
//! Each worker loop leases a task, claims the attempt in the registry, runs
//! the pipeline in its own spawned task while heartbeating the lease, and
//! settles the outcome through the retry policy. A panicking attempt is
//! treated as a crashed worker: its lease is left to expire so the task is
//! handed out again.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use lingo_ai::EngineFactory;
use lingo_models::{
    ChunkSpec, ChunkStatus, ErrorKind, ProgressUpdate, TaskError, TaskId, TaskResult, TaskState,
};
use lingo_queue::{Lease, LeaseQueue, LeaseToken, ProgressStore, RegistryError, TaskRegistry};

use crate::config::WorkerConfig;
use crate::error::PipelineResult;
use crate::logging::TaskLogger;
use crate::metrics;
use crate::pipeline::{AttemptContext, PipelineRunner, StageReporter};
use crate::retry::RetryDecision;

struct Shared {
    config: WorkerConfig,
    queue: Arc<LeaseQueue>,
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressStore>,
    runner: Arc<PipelineRunner>,
    engines: Arc<dyn EngineFactory>,
    in_flight: AtomicUsize,
}

/// Pool of worker loops plus the janitor.
pub struct WorkerPool {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<LeaseQueue>,
        registry: Arc<TaskRegistry>,
        progress: Arc<ProgressStore>,
        runner: Arc<PipelineRunner>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                queue,
                registry,
                progress,
                runner,
                engines,
                in_flight: AtomicUsize::new(0),
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker loops and the janitor. Calling it again is a no-op.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        info!(workers = self.shared.config.workers, "Starting worker pool");
        for worker_id in 0..self.shared.config.workers {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(worker_loop(shared, worker_id)));
        }
        handles.push(tokio::spawn(janitor_loop(
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        )));
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Stop leasing, then wait for in-flight attempts up to the shutdown
    /// timeout.
    pub async fn shutdown(&self) {
        info!("Shutting down worker pool");
        let _ = self.shutdown.send(true);
        self.shared.queue.close().await;

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let timeout = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(timeout, join_all(handles)).await.is_err() {
            warn!(
                timeout_secs = timeout.as_secs(),
                in_flight = self.in_flight(),
                "Shutdown timed out with attempts still running"
            );
        } else {
            info!("Worker pool stopped");
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    debug!(worker_id, "Worker started");
    while let Some(lease) = shared.queue.dequeue().await {
        let count = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_in_flight(count);

        handle_lease(&shared, lease).await;

        let count = shared.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_in_flight(count);
    }
    debug!(worker_id, "Worker stopped");
}

async fn janitor_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(shared.config.janitor_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => sweep(&shared).await,
        }
    }
}

async fn sweep(shared: &Shared) {
    let reclaimed = shared.queue.reclaim_expired().await;
    if !reclaimed.is_empty() {
        warn!(count = reclaimed.len(), "Reclaimed expired leases");
        metrics::record_reclaimed(reclaimed.len());
    }

    let purged = shared.registry.purge_expired(shared.config.retention).await;
    for task_id in &purged {
        shared.progress.purge(task_id).await;
    }
    if !purged.is_empty() {
        debug!(count = purged.len(), "Purged finished tasks past retention");
    }
}

async fn handle_lease(shared: &Arc<Shared>, lease: Lease) {
    let start = match shared.registry.begin_attempt(&lease.task_id, lease.token).await {
        Ok(start) => start,
        Err(RegistryError::Cancelled(task_id)) => {
            info!(task_id = %task_id, "Task cancelled before its attempt started");
            if let Some(task) = shared.registry.get(&task_id).await {
                record_event(
                    shared,
                    &task_id,
                    ProgressUpdate::lifecycle(task.attempt, TaskState::Failure, task.progress, "cancelled"),
                )
                .await;
            }
            ack(shared, &lease).await;
            return;
        }
        Err(e) => {
            debug!(task_id = %lease.task_id, "Dropping lease: {}", e);
            ack(shared, &lease).await;
            return;
        }
    };

    let logger = TaskLogger::new(&start.task_id, start.kind, start.attempt);
    let span = logger.span();
    let ctx = AttemptContext {
        task_id: start.task_id.clone(),
        kind: start.kind,
        input: start.input.clone(),
        attempt: start.attempt,
        cancel: start.cancel.clone(),
    };

    async {
        logger.started(lease.delivery, start.committed_progress);
        record_event(
            shared,
            &ctx.task_id,
            ProgressUpdate::lifecycle(
                ctx.attempt,
                TaskState::Started,
                start.committed_progress,
                format!("attempt {} started", ctx.attempt),
            ),
        )
        .await;

        // Redeliveries after crashes also consume attempts.
        if ctx.attempt > shared.config.retry.max_attempts {
            let exhausted = TaskError::new(
                ErrorKind::Transient,
                format!("attempt limit of {} reached", shared.config.retry.max_attempts),
            );
            fail(shared, &lease, &ctx, &logger, exhausted).await;
            return;
        }

        let reporter = AttemptReporter {
            registry: Arc::clone(&shared.registry),
            progress: Arc::clone(&shared.progress),
            task_id: ctx.task_id.clone(),
            token: lease.token,
            attempt: ctx.attempt,
            logger: logger.clone(),
        };
        let runner = Arc::clone(&shared.runner);
        let engines = Arc::clone(&shared.engines);
        let attempt_ctx = ctx.clone();
        let mut attempt = tokio::spawn(
            run_attempt(runner, engines, attempt_ctx, reporter).in_current_span(),
        );

        let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        let joined = loop {
            tokio::select! {
                joined = &mut attempt => break joined,
                _ = heartbeat.tick() => {
                    if let Err(e) = shared.queue.heartbeat(&lease).await {
                        logger.heartbeat_rejected(&e);
                    }
                }
            }
        };

        match joined {
            Ok(outcome) => settle(shared, &lease, &ctx, &logger, outcome).await,
            Err(e) => {
                // No ack: the lease expires and the task is handed out again.
                logger.crashed(&e);
                metrics::record_crash();
            }
        }
    }
    .instrument(span)
    .await
}

/// Build the attempt's engine and run the pipeline with it.
async fn run_attempt(
    runner: Arc<PipelineRunner>,
    engines: Arc<dyn EngineFactory>,
    ctx: AttemptContext,
    reporter: AttemptReporter,
) -> PipelineResult<TaskResult> {
    let engine = engines.build(&ctx.input)?;
    debug!(engine = engine.name(), "Engine ready");
    runner.run(&ctx, engine.as_ref(), &reporter).await
}

async fn settle(
    shared: &Shared,
    lease: &Lease,
    ctx: &AttemptContext,
    logger: &TaskLogger,
    outcome: PipelineResult<TaskResult>,
) {
    let error = match outcome {
        Ok(result) => {
            complete(shared, lease, ctx, logger, result).await;
            return;
        }
        Err(e) if e.is_lease_lost() => {
            logger.lease_lost("pipeline", &e);
            return;
        }
        Err(e) => e,
    };

    let kind = error.kind();
    if kind == ErrorKind::Cancelled {
        fail(shared, lease, ctx, logger, TaskError::cancelled()).await;
        return;
    }

    let task_error = TaskError::new(kind, error.to_string());
    match shared.config.retry.decide(ctx.attempt, kind) {
        RetryDecision::Retry { delay } => {
            let message = format!(
                "attempt {} failed, retrying in {}ms: {}",
                ctx.attempt,
                delay.as_millis(),
                task_error.message
            );
            logger.retry_scheduled(delay, &task_error);
            let status = match shared
                .registry
                .mark_retry(&ctx.task_id, lease.token, task_error, &message)
                .await
            {
                Ok(status) => status,
                Err(e) => {
                    logger.lease_lost("retry", &e);
                    return;
                }
            };
            record_event(
                shared,
                &ctx.task_id,
                ProgressUpdate::lifecycle(ctx.attempt, TaskState::Retry, status.progress, message),
            )
            .await;
            if let Err(e) = shared.queue.retry_after(lease, delay).await {
                logger.requeue_failed(&e);
            }
            metrics::record_retried(ctx.kind.as_str());
        }
        RetryDecision::Fail => fail(shared, lease, ctx, logger, task_error).await,
    }
}

async fn complete(
    shared: &Shared,
    lease: &Lease,
    ctx: &AttemptContext,
    logger: &TaskLogger,
    result: TaskResult,
) {
    logger.succeeded(&result);
    if let Err(e) = shared
        .registry
        .complete(&ctx.task_id, lease.token, result)
        .await
    {
        logger.lease_lost("completion", &e);
        return;
    }
    record_event(
        shared,
        &ctx.task_id,
        ProgressUpdate::lifecycle(ctx.attempt, TaskState::Success, 100.0, "completed"),
    )
    .await;
    ack(shared, lease).await;
    metrics::record_completed(ctx.kind.as_str());
}

async fn fail(
    shared: &Shared,
    lease: &Lease,
    ctx: &AttemptContext,
    logger: &TaskLogger,
    error: TaskError,
) {
    let error_kind = error.kind.as_str();
    logger.failed(&error);
    let status = match shared.registry.fail(&ctx.task_id, lease.token, error).await {
        Ok(status) => status,
        Err(e) => {
            logger.lease_lost("failure", &e);
            return;
        }
    };
    record_event(
        shared,
        &ctx.task_id,
        ProgressUpdate::lifecycle(ctx.attempt, TaskState::Failure, status.progress, status.message),
    )
    .await;
    ack(shared, lease).await;
    metrics::record_failed(ctx.kind.as_str(), error_kind);
}

async fn record_event(shared: &Shared, task_id: &TaskId, update: ProgressUpdate) {
    if let Err(e) = shared.progress.record(task_id, update).await {
        warn!(task_id = %task_id, "Progress event rejected: {}", e);
    }
}

async fn ack(shared: &Shared, lease: &Lease) {
    if let Err(e) = shared.queue.ack(lease).await {
        debug!(task_id = %lease.task_id, "Ack ignored: {}", e);
    }
}

/// Turns stage completions of one attempt into registry updates and
/// progress events. The registry write goes first so a fenced-off attempt
/// never reaches the progress log.
struct AttemptReporter {
    registry: Arc<TaskRegistry>,
    progress: Arc<ProgressStore>,
    task_id: TaskId,
    token: LeaseToken,
    attempt: u32,
    logger: TaskLogger,
}

#[async_trait]
impl StageReporter for AttemptReporter {
    async fn stage_completed(
        &self,
        chunk: &ChunkSpec,
        stage: ChunkStatus,
        percent: f64,
        message: &str,
    ) -> PipelineResult<()> {
        self.registry
            .update_progress(&self.task_id, self.token, percent, message)
            .await?;
        self.progress
            .record(
                &self.task_id,
                ProgressUpdate::stage(self.attempt, stage, chunk.chunk_index, percent, message),
            )
            .await?;
        self.logger.stage_completed(chunk, stage, percent);
        Ok(())
    }

    async fn chunk_committed(&self, _chunk: &ChunkSpec, percent: f64) -> PipelineResult<()> {
        self.registry
            .commit_progress(&self.task_id, self.token, percent)
            .await?;
        Ok(())
    }
}
