//! Pipeline stage runner.
//!
//! Walks every chunk of a task through transcribe, filter, subtitles,
//! translate and the finalize commit. A chunk whose durable status is already
//! `FINALIZED` is not recomputed; its committed summary is reused, which is
//! what makes re-running a task after a crash idempotent.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lingo_ai::AiStage;
use lingo_models::{
    stage_percent, ChunkSpec, ChunkStatus, ChunkSummary, ErrorKind, Segment, SubtitleFormat,
    TaskId, TaskInput, TaskKind, TaskResult, TranslatedSegment, TranslationRow,
};
use lingo_store::{with_retry, ChunkCommit, PersistenceGateway, RetryConfig};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::metrics;
use crate::state_machine::ChunkMachine;
use crate::subtitle;
use crate::vocabulary::DifficultyFilter;

/// Identity of the attempt being run.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub input: Arc<TaskInput>,
    pub attempt: u32,
    pub cancel: CancellationToken,
}

/// Receives stage completions. The worker turns these into progress events
/// and registry updates; an error aborts the attempt.
#[async_trait]
pub trait StageReporter: Send + Sync {
    async fn stage_completed(
        &self,
        chunk: &ChunkSpec,
        stage: ChunkStatus,
        percent: f64,
        message: &str,
    ) -> PipelineResult<()>;

    /// The chunk's results are durable up to `percent`.
    async fn chunk_committed(&self, chunk: &ChunkSpec, percent: f64) -> PipelineResult<()>;
}

/// Soft and hard limits of one attempt.
struct AttemptClock {
    started: Instant,
    soft_limit: Duration,
    hard_limit: Duration,
    soft_warned: bool,
}

impl AttemptClock {
    fn start(soft_limit: Duration, hard_limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            soft_limit,
            hard_limit,
            soft_warned: false,
        }
    }

    fn remaining(&self) -> Duration {
        self.hard_limit.saturating_sub(self.started.elapsed())
    }

    fn hard_timeout(&self, stage: &'static str) -> PipelineError {
        PipelineError::HardTimeout {
            stage,
            limit_secs: self.hard_limit.as_secs(),
        }
    }
}

pub struct PipelineRunner {
    gateway: Arc<dyn PersistenceGateway>,
    filter: DifficultyFilter,
    subtitle_format: SubtitleFormat,
    artifact_prefix: String,
    store_retry: RetryConfig,
    soft_time_limit: Duration,
    hard_time_limit: Duration,
}

impl PipelineRunner {
    pub fn new(gateway: Arc<dyn PersistenceGateway>, config: &WorkerConfig) -> Self {
        Self {
            gateway,
            filter: DifficultyFilter::new(&config.vocabulary),
            subtitle_format: config.subtitle_format,
            artifact_prefix: config.artifact_prefix.clone(),
            store_retry: config.store_retry.clone(),
            soft_time_limit: config.soft_time_limit,
            hard_time_limit: config.hard_time_limit,
        }
    }

    pub fn with_filter(mut self, filter: DifficultyFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    /// Run every chunk of the task in order and aggregate the result.
    pub async fn run(
        &self,
        ctx: &AttemptContext,
        engine: &dyn AiStage,
        reporter: &dyn StageReporter,
    ) -> PipelineResult<TaskResult> {
        let chunks = ctx.input.chunks(ctx.kind);
        let mut clock = AttemptClock::start(self.soft_time_limit, self.hard_time_limit);
        let mut result = TaskResult {
            chunks_total: chunks.len() as u32,
            ..Default::default()
        };

        for chunk in &chunks {
            self.checkpoint(ctx, &mut clock, "chunk")?;

            let durable = with_retry(&self.store_retry, "ensure_chunk", || {
                self.gateway.ensure_chunk(chunk)
            })
            .await?;

            let summary = if durable == ChunkStatus::Finalized {
                self.reuse_chunk(ctx, chunk, reporter).await?
            } else {
                match self.run_chunk(ctx, chunk, engine, reporter, &mut clock).await {
                    Ok(summary) => summary,
                    Err(e) => {
                        if e.kind() == ErrorKind::Permanent {
                            if let Err(mark_err) =
                                self.gateway.mark_chunk_failed(&chunk.chunk_id).await
                            {
                                warn!(
                                    chunk_id = %chunk.chunk_id,
                                    "Failed to mark chunk as failed: {}", mark_err
                                );
                            }
                        }
                        return Err(e);
                    }
                }
            };

            result.vocabulary_count += summary.vocabulary_count;
            result.segments_count += summary.segments_count;
            result.translations_count += summary.translations_count;
            if let Some(path) = summary.subtitle_path {
                result.artifact_paths.push(path);
            }
        }

        info!(
            task_id = %ctx.task_id,
            attempt = ctx.attempt,
            chunks = result.chunks_total,
            vocabulary = result.vocabulary_count,
            "Pipeline finished"
        );
        Ok(result)
    }

    async fn reuse_chunk(
        &self,
        ctx: &AttemptContext,
        chunk: &ChunkSpec,
        reporter: &dyn StageReporter,
    ) -> PipelineResult<ChunkSummary> {
        let summary = with_retry(&self.store_retry, "read_chunk_summary", || {
            self.gateway.read_chunk_summary(&chunk.chunk_id)
        })
        .await?;

        info!(
            task_id = %ctx.task_id,
            chunk_id = %chunk.chunk_id,
            "Chunk already finalized, reusing committed result"
        );
        metrics::record_chunk_skipped();

        let percent = stage_percent(chunk.chunk_index, chunk.total_chunks, 5);
        reporter
            .stage_completed(
                chunk,
                ChunkStatus::Finalized,
                percent,
                &format!(
                    "chunk {}/{} already finalized",
                    chunk.chunk_index, chunk.total_chunks
                ),
            )
            .await?;
        reporter.chunk_committed(chunk, percent).await?;
        Ok(summary)
    }

    async fn run_chunk(
        &self,
        ctx: &AttemptContext,
        chunk: &ChunkSpec,
        engine: &dyn AiStage,
        reporter: &dyn StageReporter,
        clock: &mut AttemptClock,
    ) -> PipelineResult<ChunkSummary> {
        let plan = ctx.kind.stage_plan();
        let input = &ctx.input;
        let mut machine = ChunkMachine::new(chunk.chunk_id.clone());
        let label = format!("chunk {}/{}", chunk.chunk_index, chunk.total_chunks);
        let percent = |step| stage_percent(chunk.chunk_index, chunk.total_chunks, step);

        // 1. Transcribe
        machine.advance(ChunkStatus::Transcribing)?;
        let stage_start = Instant::now();
        let segments = self
            .bounded(
                clock,
                "transcribe",
                engine.transcribe(
                    &input.video_path,
                    chunk.start_time,
                    chunk.end_time,
                    &input.source_lang,
                ),
            )
            .await?;
        metrics::record_stage("transcribe", stage_start.elapsed().as_secs_f64());
        reporter
            .stage_completed(
                chunk,
                ChunkStatus::Transcribing,
                percent(1),
                &format!("{}: transcribed {} segments", label, segments.len()),
            )
            .await?;
        self.checkpoint(ctx, clock, "filter")?;

        // 2. Filter vocabulary
        machine.advance(ChunkStatus::Filtering)?;
        let vocabulary = if plan.extract_vocabulary {
            let candidates = engine.extract_vocabulary(&segments, &input.source_lang);
            self.filter
                .apply(chunk, &segments, candidates, &input.source_lang)
        } else {
            Vec::new()
        };
        reporter
            .stage_completed(
                chunk,
                ChunkStatus::Filtering,
                percent(2),
                &format!("{}: kept {} vocabulary words", label, vocabulary.len()),
            )
            .await?;
        self.checkpoint(ctx, clock, "subtitles")?;

        // 3. Subtitles
        machine.advance(ChunkStatus::GeneratingSubtitles)?;
        let artifact = subtitle::render(
            chunk,
            &segments,
            self.subtitle_format,
            &self.artifact_prefix,
        );
        reporter
            .stage_completed(
                chunk,
                ChunkStatus::GeneratingSubtitles,
                percent(3),
                &format!("{}: rendered {} cues", label, artifact.cue_count),
            )
            .await?;
        self.checkpoint(ctx, clock, "translate")?;

        // 4. Translate
        machine.advance(ChunkStatus::Translating)?;
        let translations = if plan.translate && !segments.is_empty() {
            let stage_start = Instant::now();
            let translated = self
                .bounded(
                    clock,
                    "translate",
                    engine.translate(&segments, &input.source_lang, &input.target_lang),
                )
                .await?;
            metrics::record_stage("translate", stage_start.elapsed().as_secs_f64());
            align_translations(chunk, &segments, translated, input)?
        } else {
            Vec::new()
        };
        reporter
            .stage_completed(
                chunk,
                ChunkStatus::Translating,
                percent(4),
                &format!("{}: translated {} segments", label, translations.len()),
            )
            .await?;
        self.checkpoint(ctx, clock, "commit")?;

        // 5. Finalize
        let commit = ChunkCommit {
            chunk_id: chunk.chunk_id.clone(),
            subtitle: artifact,
            vocabulary,
            translations,
            segments_count: segments.len() as u32,
            new_status: ChunkStatus::Finalized,
        };
        let summary = commit.summary();
        let stage_start = Instant::now();
        self.bounded(clock, "commit", self.gateway.commit_chunk_result(commit))
            .await?;
        metrics::record_stage("commit", stage_start.elapsed().as_secs_f64());
        machine.advance(ChunkStatus::Finalized)?;

        reporter
            .stage_completed(
                chunk,
                ChunkStatus::Finalized,
                percent(5),
                &format!("{}: finalized", label),
            )
            .await?;
        reporter.chunk_committed(chunk, percent(5)).await?;
        Ok(summary)
    }

    /// Run an AI call or the commit within the remaining hard budget.
    async fn bounded<T, E, F>(
        &self,
        clock: &AttemptClock,
        stage: &'static str,
        fut: F,
    ) -> PipelineResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<PipelineError>,
    {
        let remaining = clock.remaining();
        if remaining.is_zero() {
            return Err(clock.hard_timeout(stage));
        }
        match tokio::time::timeout(remaining, fut).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(clock.hard_timeout(stage)),
        }
    }

    /// Stage boundary: observe cancellation and the time limits.
    fn checkpoint(
        &self,
        ctx: &AttemptContext,
        clock: &mut AttemptClock,
        next: &'static str,
    ) -> PipelineResult<()> {
        if ctx.cancel.is_cancelled() {
            info!(task_id = %ctx.task_id, attempt = ctx.attempt, next, "Cancellation observed");
            return Err(PipelineError::Cancelled);
        }
        let elapsed = clock.started.elapsed();
        if elapsed >= clock.hard_limit {
            return Err(clock.hard_timeout(next));
        }
        if elapsed >= clock.soft_limit && !clock.soft_warned {
            clock.soft_warned = true;
            warn!(
                task_id = %ctx.task_id,
                attempt = ctx.attempt,
                elapsed_secs = elapsed.as_secs(),
                soft_limit_secs = clock.soft_limit.as_secs(),
                "Soft time limit exceeded"
            );
        }
        Ok(())
    }
}

/// Pair each segment with its translation; the response must match 1:1.
fn align_translations(
    chunk: &ChunkSpec,
    segments: &[Segment],
    translated: Vec<TranslatedSegment>,
    input: &TaskInput,
) -> PipelineResult<Vec<TranslationRow>> {
    if translated.len() != segments.len() {
        return Err(PipelineError::Misaligned {
            expected: segments.len(),
            got: translated.len(),
        });
    }
    if let Some((segment, _)) = segments
        .iter()
        .zip(&translated)
        .find(|(s, t)| s.index != t.index)
    {
        debug!(chunk_id = %chunk.chunk_id, segment = segment.index, "Translation index mismatch");
        return Err(PipelineError::Misaligned {
            expected: segments.len(),
            got: translated.len(),
        });
    }

    Ok(segments
        .iter()
        .zip(translated)
        .map(|(segment, t)| TranslationRow {
            chunk_id: chunk.chunk_id.clone(),
            segment_index: segment.index,
            source_text: segment.text.clone(),
            translated_text: t.translated_text,
            source_lang: input.source_lang.clone(),
            target_lang: input.target_lang.clone(),
        })
        .collect())
}
