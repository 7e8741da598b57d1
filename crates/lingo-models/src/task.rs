//! Task definitions for the ingestion orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::chunk::{plan_chunks, ChunkSpec};
use crate::error::{ValidationError, ValidationResult};

/// Upper bound on chunks a single task may fan out into.
pub const MAX_CHUNKS_PER_TASK: usize = 256;

/// Longest media range a single task may cover (24 hours in seconds).
pub const MAX_MEDIA_DURATION_SECS: f64 = 86400.0;

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of task, selects which stages do real work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Full pipeline: transcript, vocabulary, subtitles, translation.
    ChunkTranscription,
    /// Subtitles and translation only.
    BatchTranslation,
    /// Transcript, vocabulary and subtitles, no translation.
    VocabularyExtraction,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ChunkTranscription => "chunk_transcription",
            TaskKind::BatchTranslation => "batch_translation",
            TaskKind::VocabularyExtraction => "vocabulary_extraction",
        }
    }

    /// Which stages perform work for this kind.
    ///
    /// Every kind still walks the full chunk state machine; a disabled stage
    /// is entered and left as a pass-through.
    pub fn stage_plan(&self) -> StagePlan {
        match self {
            TaskKind::ChunkTranscription => StagePlan {
                extract_vocabulary: true,
                translate: true,
            },
            TaskKind::BatchTranslation => StagePlan {
                extract_vocabulary: false,
                translate: true,
            },
            TaskKind::VocabularyExtraction => StagePlan {
                extract_vocabulary: true,
                translate: false,
            },
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage switches derived from a [`TaskKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePlan {
    pub extract_vocabulary: bool,
    pub translate: bool,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting in the queue
    #[default]
    Pending,
    /// Leased by a worker, attempt started
    Started,
    /// Pipeline running
    Progress,
    /// Finished with a result
    Success,
    /// Finished with an error
    Failure,
    /// Waiting for a delayed re-attempt
    Retry,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Progress => "PROGRESS",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
        }
    }

    /// Terminal states are immutable once set.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AI engine variant, chosen once at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// HTTP inference service
    #[default]
    Remote,
    /// Transcript and translations read from files next to the media
    Sidecar,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Remote => "remote",
            EngineKind::Sidecar => "sidecar",
        }
    }
}

/// Immutable task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    /// Video the chunks belong to
    pub video_id: String,
    /// Path (or URI) of the media file
    pub video_path: String,
    /// Range start in seconds
    pub start_time: f64,
    /// Range end in seconds
    pub end_time: f64,
    /// Length of one chunk in seconds
    #[serde(default = "default_chunk_duration")]
    pub chunk_duration: f64,
    /// Owning user
    pub user_id: String,
    /// Spoken language of the media
    pub source_lang: String,
    /// Language to translate into
    pub target_lang: String,
    /// Engine variant for every stage of this task
    #[serde(default)]
    pub engine: EngineKind,
}

fn default_chunk_duration() -> f64 {
    300.0
}

impl TaskInput {
    pub fn new(
        video_id: impl Into<String>,
        video_path: impl Into<String>,
        start_time: f64,
        end_time: f64,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            video_path: video_path.into(),
            start_time,
            end_time,
            chunk_duration: default_chunk_duration(),
            user_id: user_id.into(),
            source_lang: "en".to_string(),
            target_lang: "es".to_string(),
            engine: EngineKind::default(),
        }
    }

    /// Set the language pair.
    pub fn with_languages(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_lang = source.into();
        self.target_lang = target.into();
        self
    }

    /// Set the chunk duration.
    pub fn with_chunk_duration(mut self, secs: f64) -> Self {
        self.chunk_duration = secs;
        self
    }

    /// Set the engine.
    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    /// Validate the payload for the given task kind.
    pub fn validate(&self, kind: TaskKind) -> ValidationResult<()> {
        if self.video_id.trim().is_empty() {
            return Err(ValidationError::MissingField("video_id"));
        }
        if self.video_path.trim().is_empty() {
            return Err(ValidationError::MissingField("video_path"));
        }
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }

        let times = [self.start_time, self.end_time, self.chunk_duration];
        if times.iter().any(|t| !t.is_finite()) {
            return Err(ValidationError::InvalidRange("times must be finite".into()));
        }
        if self.start_time < 0.0 {
            return Err(ValidationError::InvalidRange("start_time is negative".into()));
        }
        if self.start_time >= self.end_time {
            return Err(ValidationError::InvalidRange(format!(
                "start_time {} is not before end_time {}",
                self.start_time, self.end_time
            )));
        }
        if self.end_time > MAX_MEDIA_DURATION_SECS {
            return Err(ValidationError::InvalidRange(format!(
                "end_time exceeds {} seconds",
                MAX_MEDIA_DURATION_SECS
            )));
        }
        if self.chunk_duration <= 0.0 {
            return Err(ValidationError::InvalidRange("chunk_duration must be positive".into()));
        }

        let chunks = ((self.end_time - self.start_time) / self.chunk_duration).ceil() as usize;
        if chunks > MAX_CHUNKS_PER_TASK {
            return Err(ValidationError::TooManyChunks {
                chunks,
                max: MAX_CHUNKS_PER_TASK,
            });
        }

        validate_language(&self.source_lang)?;
        validate_language(&self.target_lang)?;
        if kind.stage_plan().translate && self.source_lang.eq_ignore_ascii_case(&self.target_lang) {
            return Err(ValidationError::SameLanguage(self.source_lang.clone()));
        }

        Ok(())
    }

    /// Work variant of a chunk for `kind`: the kind plus every language the
    /// stages read or write.
    pub fn chunk_variant(&self, kind: TaskKind) -> String {
        if kind.stage_plan().translate {
            format!("{}.{}-{}", kind.as_str(), self.source_lang, self.target_lang)
        } else {
            format!("{}.{}", kind.as_str(), self.source_lang)
        }
    }

    /// Chunks this input covers for `kind`, in order.
    pub fn chunks(&self, kind: TaskKind) -> Vec<ChunkSpec> {
        plan_chunks(
            &self.video_id,
            &self.chunk_variant(kind),
            self.start_time,
            self.end_time,
            self.chunk_duration,
        )
    }
}

fn validate_language(code: &str) -> ValidationResult<()> {
    let ok = (2..=8).contains(&code.len())
        && code.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
        && !code.starts_with('-');
    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidLanguage(code.to_string()))
    }
}

/// Structured payload of a successful task.
///
/// The same shape is produced on every attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TaskResult {
    pub vocabulary_count: u32,
    pub segments_count: u32,
    pub translations_count: u32,
    pub chunks_total: u32,
    pub artifact_paths: Vec<String>,
}

/// Orchestrator-owned record of a task.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub input: std::sync::Arc<TaskInput>,
    pub state: TaskState,
    /// Attempts started so far
    pub attempt: u32,
    /// Current progress (0-100)
    pub progress: f64,
    /// Progress at the last committed chunk boundary
    pub committed_progress: f64,
    pub result: Option<TaskResult>,
    pub error: Option<crate::status::TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(kind: TaskKind, input: std::sync::Arc<TaskInput>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind,
            input,
            state: TaskState::Pending,
            attempt: 0,
            progress: 0.0,
            committed_progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
