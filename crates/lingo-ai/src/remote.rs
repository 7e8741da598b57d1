//! HTTP inference service engine.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use lingo_models::{Segment, TranslatedSegment};

use crate::engine::AiStage;
use crate::error::{AiError, AiResult};
use crate::probe::ensure_supported_container;
use crate::types::{
    HealthResponse, TranscribeRequest, TranscribeResponse, TranslateItem, TranslateRequest,
    TranslateResponse,
};

/// Configuration for the remote engine.
#[derive(Debug, Clone)]
pub struct RemoteEngineConfig {
    /// Base URL of the inference service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Optional bearer token
    pub api_token: Option<String>,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(300), // 5 minutes for long chunks
            api_token: None,
        }
    }
}

impl RemoteEngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("LINGO_AI_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("LINGO_AI_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            api_token: std::env::var("LINGO_AI_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

/// Engine backed by an HTTP inference service.
///
/// No retries happen here; failed calls surface classified errors and the
/// orchestrator's retry policy decides.
pub struct RemoteEngine {
    http: Client,
    config: RemoteEngineConfig,
}

impl RemoteEngine {
    pub fn new(config: RemoteEngineConfig) -> AiResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(AiError::Network)?;

        Ok(Self { http, config })
    }

    /// Check if the service is healthy.
    pub async fn health_check(&self) -> AiResult<bool> {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("AI service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("AI service health check error: {}", e);
                Ok(false)
            }
        }
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> AiResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url, path);
        debug!("Sending AI request to {}", url);

        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AiError::Timeout(self.config.timeout.as_secs())
            } else {
                AiError::Network(e)
            }
        })?;

        Self::decode(response).await
    }

    async fn decode<Resp: DeserializeOwned>(response: Response) -> AiResult<Resp> {
        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::from_status(status.as_u16(), body, retry_after_ms));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AiError::invalid_response(format!("malformed body: {}", e)))
    }
}

#[async_trait]
impl AiStage for RemoteEngine {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn transcribe(
        &self,
        video_path: &str,
        start: f64,
        end: f64,
        language: &str,
    ) -> AiResult<Vec<Segment>> {
        ensure_supported_container(video_path)?;

        let request = TranscribeRequest {
            video_path: video_path.to_string(),
            start,
            end,
            language: language.to_string(),
        };
        let response: TranscribeResponse = self.post("/v1/transcribe", &request).await?;

        let mut segments = Vec::with_capacity(response.segments.len());
        for (i, s) in response.segments.into_iter().enumerate() {
            if !(s.end >= s.start) {
                return Err(AiError::invalid_response(format!(
                    "segment {} ends before it starts",
                    i
                )));
            }
            segments.push(Segment {
                index: i as u32,
                start: s.start,
                end: s.end,
                text: s.text.trim().to_string(),
            });
        }
        Ok(segments)
    }

    async fn translate(
        &self,
        segments: &[Segment],
        source_lang: &str,
        target_lang: &str,
    ) -> AiResult<Vec<TranslatedSegment>> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let request = TranslateRequest {
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            items: segments
                .iter()
                .map(|s| TranslateItem {
                    index: s.index,
                    text: s.text.clone(),
                })
                .collect(),
        };
        let response: TranslateResponse = self.post("/v1/translate", &request).await?;

        let mut by_index: HashMap<u32, String> = response
            .items
            .into_iter()
            .map(|item| (item.index, item.text))
            .collect();

        segments
            .iter()
            .map(|s| {
                let translated = by_index.remove(&s.index).ok_or_else(|| {
                    AiError::invalid_response(format!("missing translation for segment {}", s.index))
                })?;
                Ok(TranslatedSegment {
                    index: s.index,
                    start: s.start,
                    end: s.end,
                    source_text: s.text.clone(),
                    translated_text: translated,
                })
            })
            .collect()
    }
}
