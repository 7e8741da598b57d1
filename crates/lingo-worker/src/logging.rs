//! Attempt lifecycle logging.
//!
//! Every line an attempt emits carries `task_id`, `kind` and `attempt`;
//! stage lines add the chunk and stage, outcome lines add the error class
//! or the result counters.

use std::fmt::Display;
use std::time::Duration;

use tracing::{error, info, warn, Span};

use lingo_models::{ChunkSpec, ChunkStatus, TaskError, TaskId, TaskKind, TaskResult};

#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: TaskId,
    kind: TaskKind,
    attempt: u32,
}

impl TaskLogger {
    pub fn new(task_id: &TaskId, kind: TaskKind, attempt: u32) -> Self {
        Self {
            task_id: task_id.clone(),
            kind,
            attempt,
        }
    }

    /// Span wrapping the whole attempt.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "attempt",
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt
        )
    }

    pub fn started(&self, delivery: u32, resume_percent: f64) {
        info!(
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt,
            delivery,
            resume_percent,
            "Attempt started"
        );
    }

    pub fn stage_completed(&self, chunk: &ChunkSpec, stage: ChunkStatus, percent: f64) {
        info!(
            task_id = %self.task_id,
            attempt = self.attempt,
            chunk_id = %chunk.chunk_id,
            chunk = chunk.chunk_index,
            chunks = chunk.total_chunks,
            stage = stage.as_str(),
            percent,
            "Stage completed"
        );
    }

    pub fn heartbeat_rejected(&self, err: &dyn Display) {
        warn!(
            task_id = %self.task_id,
            attempt = self.attempt,
            "Lease heartbeat rejected: {}", err
        );
    }

    /// The attempt's task panicked; its lease is left to expire.
    pub fn crashed(&self, err: &dyn Display) {
        error!(
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt,
            "Attempt crashed: {}", err
        );
    }

    /// A write was fenced off because another lease owns the task now.
    pub fn lease_lost(&self, during: &'static str, err: &dyn Display) {
        warn!(
            task_id = %self.task_id,
            attempt = self.attempt,
            during,
            "Lease lost, dropping attempt: {}", err
        );
    }

    pub fn retry_scheduled(&self, delay: Duration, error: &TaskError) {
        warn!(
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt,
            error_kind = error.kind.as_str(),
            delay_ms = delay.as_millis() as u64,
            "Attempt failed, retry scheduled: {}", error.message
        );
    }

    pub fn requeue_failed(&self, err: &dyn Display) {
        warn!(task_id = %self.task_id, attempt = self.attempt, "Requeue failed: {}", err);
    }

    pub fn succeeded(&self, result: &TaskResult) {
        info!(
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt,
            chunks = result.chunks_total,
            segments = result.segments_count,
            vocabulary = result.vocabulary_count,
            translations = result.translations_count,
            "Task succeeded"
        );
    }

    pub fn failed(&self, error: &TaskError) {
        error!(
            task_id = %self.task_id,
            kind = self.kind.as_str(),
            attempt = self.attempt,
            error_kind = error.kind.as_str(),
            "Task failed: {}", error.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use lingo_models::{ErrorKind, TaskInput};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let out = Capture::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_stage_lines_carry_chunk_context() {
        let id = TaskId::from_string("task-123");
        let logger = TaskLogger::new(&id, TaskKind::BatchTranslation, 2);
        let input = TaskInput::new("vid", "/media/a.mp4", 0.0, 600.0, "user");
        let chunk = input.chunks(TaskKind::BatchTranslation).remove(1);

        let out = capture(|| logger.stage_completed(&chunk, ChunkStatus::Translating, 90.0));

        assert!(out.contains("task_id=task-123"));
        assert!(out.contains("attempt=2"));
        assert!(out.contains(&format!("chunk_id={}", chunk.chunk_id)));
        assert!(out.contains("chunk=2"));
        assert!(out.contains("stage=\"TRANSLATING\""));
    }

    #[test]
    fn test_failure_line_carries_error_kind() {
        let logger = TaskLogger::new(&TaskId::from_string("t"), TaskKind::ChunkTranscription, 1);
        let out = capture(|| logger.failed(&TaskError::new(ErrorKind::Permanent, "bad codec")));

        assert!(out.contains("ERROR"));
        assert!(out.contains("error_kind=\"permanent\""));
        assert!(out.contains("bad codec"));
    }
}
