//! AI service request/response types.

use serde::{Deserialize, Serialize};

/// Request to transcribe a time range of a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeRequest {
    pub video_path: String,
    pub start: f64,
    pub end: f64,
    pub language: String,
}

/// One segment as returned by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscribeResponse {
    pub segments: Vec<WireSegment>,
}

/// Segment text sent for translation, keyed by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateItem {
    pub index: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub source_lang: String,
    pub target_lang: String,
    pub items: Vec<TranslateItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub items: Vec<TranslateItem>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
