//! Media container checks done before any engine call.

use std::path::Path;

use crate::error::{AiError, AiResult};

/// Containers the engines can decode.
pub const SUPPORTED_CONTAINERS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "mov", "mp3", "m4a", "wav", "flac", "ogg", "opus", "aac",
];

/// Reject media whose container the engines cannot decode.
///
/// The check is by extension; URLs are accepted when their path ends in a
/// supported extension.
pub fn ensure_supported_container(video_path: &str) -> AiResult<&'static str> {
    let without_query = video_path.split(['?', '#']).next().unwrap_or(video_path);
    let ext = Path::new(without_query)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| {
            AiError::unsupported_media(format!("cannot determine container of '{}'", video_path))
        })?;

    SUPPORTED_CONTAINERS
        .iter()
        .find(|c| **c == ext)
        .copied()
        .ok_or_else(|| AiError::unsupported_media(format!("unsupported codec/container '.{}'", ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_models::ErrorKind;

    #[test]
    fn test_supported_containers() {
        assert_eq!(ensure_supported_container("/media/a.MP4").unwrap(), "mp4");
        assert_eq!(
            ensure_supported_container("https://cdn.example.com/v/talk.webm?sig=1").unwrap(),
            "webm"
        );
    }

    #[test]
    fn test_unsupported_container_is_permanent() {
        let err = ensure_supported_container("/media/a.rmvb").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(ensure_supported_container("/media/noext").is_err());
    }
}
