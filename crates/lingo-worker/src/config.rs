//! Worker configuration.

use std::time::Duration;

use lingo_models::SubtitleFormat;
use lingo_queue::{QueueConfig, DEFAULT_PUSH_BUFFER};

use crate::retry::RetryPolicy;

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_parse(key).unwrap_or(default))
}

/// Vocabulary filter settings.
#[derive(Debug, Clone)]
pub struct VocabularyConfig {
    /// Candidates below this difficulty are dropped
    pub min_difficulty: f32,
    /// Max vocabulary rows kept per chunk
    pub max_words_per_chunk: usize,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            min_difficulty: 0.3,
            max_words_per_chunk: 50,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops
    pub workers: usize,
    /// Logged once when an attempt runs longer than this
    pub soft_time_limit: Duration,
    /// Attempt budget for AI calls and the commit
    pub hard_time_limit: Duration,
    /// Interval for refreshing the lease while an attempt runs
    pub heartbeat_interval: Duration,
    /// How often expired leases and old tasks are cleaned up
    pub janitor_interval: Duration,
    /// How long finished tasks stay queryable
    pub retention: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Subtitle container rendered for each chunk
    pub subtitle_format: SubtitleFormat,
    /// Storage prefix for subtitle artifacts
    pub artifact_prefix: String,
    /// Capacity of the progress push channel
    pub progress_buffer: usize,
    pub vocabulary: VocabularyConfig,
    pub retry: RetryPolicy,
    pub queue: QueueConfig,
    pub store_retry: lingo_store::RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            soft_time_limit: Duration::from_secs(1500), // 25 minutes
            hard_time_limit: Duration::from_secs(1800), // 30 minutes
            heartbeat_interval: Duration::from_secs(30),
            janitor_interval: Duration::from_secs(30),
            retention: Duration::from_secs(86400), // 1 day
            shutdown_timeout: Duration::from_secs(30),
            subtitle_format: SubtitleFormat::Srt,
            artifact_prefix: "subtitles".to_string(),
            progress_buffer: DEFAULT_PUSH_BUFFER,
            vocabulary: VocabularyConfig::default(),
            retry: RetryPolicy::default(),
            queue: QueueConfig::default(),
            store_retry: lingo_store::RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: env_parse("LINGO_WORKERS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.workers),
            soft_time_limit: env_secs("LINGO_SOFT_TIME_LIMIT_SECS", 1500),
            hard_time_limit: env_secs("LINGO_HARD_TIME_LIMIT_SECS", 1800),
            heartbeat_interval: env_secs("LINGO_HEARTBEAT_SECS", 30),
            janitor_interval: env_secs("LINGO_JANITOR_INTERVAL_SECS", 30),
            retention: env_secs("LINGO_RETENTION_SECS", 86400),
            shutdown_timeout: env_secs("LINGO_SHUTDOWN_TIMEOUT_SECS", 30),
            subtitle_format: std::env::var("LINGO_SUBTITLE_FORMAT")
                .ok()
                .and_then(|s| SubtitleFormat::parse(&s))
                .unwrap_or_default(),
            artifact_prefix: std::env::var("LINGO_ARTIFACT_PREFIX")
                .unwrap_or_else(|_| "subtitles".to_string()),
            progress_buffer: env_parse("LINGO_PROGRESS_BUFFER").unwrap_or(DEFAULT_PUSH_BUFFER),
            vocabulary: VocabularyConfig {
                min_difficulty: env_parse("LINGO_VOCAB_MIN_DIFFICULTY")
                    .unwrap_or(defaults.vocabulary.min_difficulty),
                max_words_per_chunk: env_parse("LINGO_VOCAB_MAX_WORDS")
                    .unwrap_or(defaults.vocabulary.max_words_per_chunk),
            },
            retry: RetryPolicy::from_env(),
            queue: QueueConfig::from_env(),
            store_retry: lingo_store::RetryConfig::from_env(),
        }
    }
}
