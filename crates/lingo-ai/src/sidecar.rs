//! Engine that reads transcripts and translations from a JSON file stored
//! next to the media.
//!
//! Sidecar layout (`<video_path><suffix>`, default suffix
//! `.transcript.json`):
//!
//! ```json
//! {
//!   "language": "en",
//!   "segments": [{"start": 0.0, "end": 2.0, "text": "Hello"}],
//!   "translations": {"es": ["Hola"]}
//! }
//! ```
//!
//! `translations[lang][i]` translates `segments[i]`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use lingo_models::{Segment, TranslatedSegment};

use crate::engine::AiStage;
use crate::error::{AiError, AiResult};
use crate::probe::ensure_supported_container;
use crate::types::WireSegment;

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Appended to the media path to locate the sidecar file
    pub suffix: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            suffix: ".transcript.json".to_string(),
        }
    }
}

impl SidecarConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            suffix: std::env::var("LINGO_SIDECAR_SUFFIX")
                .unwrap_or_else(|_| ".transcript.json".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SidecarFile {
    #[serde(default)]
    language: Option<String>,
    segments: Vec<WireSegment>,
    #[serde(default)]
    translations: HashMap<String, Vec<String>>,
}

/// Sidecar engine bound to one task's media file.
pub struct SidecarEngine {
    config: SidecarConfig,
    video_path: String,
}

impl SidecarEngine {
    pub fn new(config: SidecarConfig, video_path: impl Into<String>) -> Self {
        Self {
            config,
            video_path: video_path.into(),
        }
    }

    fn sidecar_path(&self, video_path: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", video_path, self.config.suffix))
    }

    async fn load(&self, video_path: &str) -> AiResult<SidecarFile> {
        let path = self.sidecar_path(video_path);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AiError::MediaNotFound(path.display().to_string()))
            }
            Err(e) => return Err(AiError::Io(e)),
        };
        serde_json::from_str(&raw).map_err(|e| {
            AiError::InvalidRequest(format!("malformed sidecar {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl AiStage for SidecarEngine {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn transcribe(
        &self,
        video_path: &str,
        start: f64,
        end: f64,
        language: &str,
    ) -> AiResult<Vec<Segment>> {
        ensure_supported_container(video_path)?;
        let file = self.load(video_path).await?;

        if let Some(lang) = &file.language {
            if !lang.eq_ignore_ascii_case(language) {
                debug!(sidecar = %lang, requested = %language, "Sidecar language differs from request");
            }
        }

        // Segments are attributed to the chunk their start falls in so that
        // adjacent chunks never share a segment.
        Ok(file
            .segments
            .into_iter()
            .enumerate()
            .filter(|(_, s)| s.start >= start && s.start < end)
            .map(|(i, s)| Segment {
                index: i as u32,
                start: s.start,
                end: s.end.min(end).max(s.start),
                text: s.text.trim().to_string(),
            })
            .collect())
    }

    async fn translate(
        &self,
        segments: &[Segment],
        _source_lang: &str,
        target_lang: &str,
    ) -> AiResult<Vec<TranslatedSegment>> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let file = self.load(&self.video_path).await?;
        let lines = file
            .translations
            .get(target_lang)
            .ok_or_else(|| AiError::MissingTranslation(target_lang.to_string()))?;

        segments
            .iter()
            .map(|s| {
                let translated = lines.get(s.index as usize).ok_or_else(|| {
                    AiError::InvalidRequest(format!(
                        "sidecar has no '{}' line for segment {}",
                        target_lang, s.index
                    ))
                })?;
                Ok(TranslatedSegment {
                    index: s.index,
                    start: s.start,
                    end: s.end,
                    source_text: s.text.clone(),
                    translated_text: translated.trim().to_string(),
                })
            })
            .collect()
    }
}
