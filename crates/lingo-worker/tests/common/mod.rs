//! Shared fixtures for the worker integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use lingo_ai::{AiError, AiResult, AiStage, EngineFactory};
use lingo_models::{ProgressEvent, Segment, TaskInput, TranslatedSegment};
use lingo_queue::QueueConfig;
use lingo_worker::{RetryPolicy, WorkerConfig};

/// Config with short leases and zero jitter so delays are exact.
pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        workers: 2,
        heartbeat_interval: Duration::from_secs(1),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_jitter: Duration::ZERO,
        },
        queue: QueueConfig {
            capacity: 64,
            visibility_timeout: Duration::from_secs(5),
        },
        ..Default::default()
    }
}

/// A 600 second lesson split into two 300 second chunks.
pub fn two_chunk_input(video_id: &str) -> TaskInput {
    TaskInput::new(video_id, format!("/media/{}.mp4", video_id), 0.0, 600.0, "user-1")
        .with_chunk_duration(300.0)
}

/// Write `lesson.mp4` and its transcript sidecar into `dir`.
pub fn write_lesson(dir: &tempfile::TempDir) -> String {
    let video = dir.path().join("lesson.mp4");
    std::fs::write(&video, b"").unwrap();
    let sidecar = serde_json::json!({
        "language": "en",
        "segments": [
            {"start": 0.0, "end": 4.0, "text": "Photosynthesis happens in chloroplasts"},
            {"start": 150.0, "end": 156.0, "text": "Chlorophyll absorbs sunlight"},
            {"start": 310.0, "end": 318.0, "text": "Mitochondria release energy"},
            {"start": 420.0, "end": 425.0, "text": "Respiration consumes glucose"}
        ],
        "translations": {"es": [
            "La fotosíntesis ocurre en los cloroplastos",
            "La clorofila absorbe la luz solar",
            "Las mitocondrias liberan energía",
            "La respiración consume glucosa"
        ]}
    });
    std::fs::write(
        dir.path().join("lesson.mp4.transcript.json"),
        serde_json::to_vec(&sidecar).unwrap(),
    )
    .unwrap();
    video.display().to_string()
}

/// Behaviour knobs shared by every engine a [`ScriptedFactory`] builds.
#[derive(Default)]
pub struct Script {
    /// Every transcribe call, with the chunk start it was asked for
    pub transcribe_log: Mutex<Vec<(String, f64, Instant)>>,
    /// Remaining transcribe calls that fail with a transient error
    pub transient_failures: AtomicUsize,
    /// Panic on the first transcribe call of every video
    pub panic_first: bool,
    /// Panic once when transcribing the chunk starting here
    pub panic_at_start: Mutex<Option<f64>>,
    /// Block transcribe until `release` is notified
    pub hold: bool,
    pub entered: Notify,
    pub release: Notify,
    pub(crate) panicked: Mutex<HashSet<String>>,
}

impl Script {
    pub fn always_transient() -> Self {
        Self {
            transient_failures: AtomicUsize::new(usize::MAX),
            ..Default::default()
        }
    }

    pub fn transcribe_calls(&self) -> usize {
        self.transcribe_log.lock().unwrap().len()
    }

    pub fn calls_for(&self, start: f64) -> usize {
        self.transcribe_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s, _)| *s == start)
            .count()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.transcribe_log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, at)| *at)
            .collect()
    }
}

pub struct ScriptedEngine {
    script: Arc<Script>,
    video_id: String,
}

#[async_trait]
impl AiStage for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(
        &self,
        _video_path: &str,
        start: f64,
        end: f64,
        _language: &str,
    ) -> AiResult<Vec<Segment>> {
        self.script
            .transcribe_log
            .lock()
            .unwrap()
            .push((self.video_id.clone(), start, Instant::now()));

        if self.script.hold {
            self.script.entered.notify_one();
            self.script.release.notified().await;
        }

        let remaining = self.script.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.script.transient_failures.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(AiError::ServiceUnavailable("inference backend overloaded".into()));
        }

        if self.script.panic_first && self.script.panicked.lock().unwrap().insert(self.video_id.clone()) {
            panic!("simulated worker crash for {}", self.video_id);
        }
        let crash_here = {
            let mut at = self.script.panic_at_start.lock().unwrap();
            if *at == Some(start) {
                at.take();
                true
            } else {
                false
            }
        };
        if crash_here {
            panic!("simulated worker crash at {}", start);
        }

        Ok(vec![
            Segment {
                index: 0,
                start,
                end: start + 5.0,
                text: "Mitochondria generate cellular energy".into(),
            },
            Segment {
                index: 1,
                start: start + 5.0,
                end: end.min(start + 9.0),
                text: "Ribosomes synthesize proteins".into(),
            },
        ])
    }

    async fn translate(
        &self,
        segments: &[Segment],
        _source_lang: &str,
        target_lang: &str,
    ) -> AiResult<Vec<TranslatedSegment>> {
        Ok(segments
            .iter()
            .map(|s| TranslatedSegment {
                index: s.index,
                start: s.start,
                end: s.end,
                source_text: s.text.clone(),
                translated_text: format!("[{}] {}", target_lang, s.text),
            })
            .collect())
    }
}

pub struct ScriptedFactory(pub Arc<Script>);

impl EngineFactory for ScriptedFactory {
    fn build(&self, input: &TaskInput) -> AiResult<Box<dyn AiStage>> {
        Ok(Box::new(ScriptedEngine {
            script: Arc::clone(&self.0),
            video_id: input.video_id.clone(),
        }))
    }
}

/// Percent values are non-decreasing within every attempt.
pub fn assert_monotonic_per_attempt(events: &[ProgressEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].sequence_number < pair[1].sequence_number,
            "sequence numbers must increase"
        );
        if pair[0].attempt == pair[1].attempt {
            assert!(
                pair[0].percent <= pair[1].percent,
                "percent went backwards within attempt {}: {} -> {}",
                pair[0].attempt,
                pair[0].percent,
                pair[1].percent
            );
        }
    }
}
