//! SRT and WebVTT rendering.

use lingo_models::{ChunkSpec, Segment, SubtitleArtifact, SubtitleFormat};

/// Format seconds as `HH:MM:SS,mmm` (SRT) or `HH:MM:SS.mmm` (WebVTT).
pub fn format_cue_time(total_secs: f64, format: SubtitleFormat) -> String {
    let total_ms = (total_secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let mins = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    let sep = match format {
        SubtitleFormat::Srt => ',',
        SubtitleFormat::Vtt => '.',
    };
    format!("{:02}:{:02}:{:02}{}{:03}", hours, mins, secs, sep, millis)
}

/// Storage path of a chunk's subtitle file.
pub fn artifact_path(prefix: &str, chunk: &ChunkSpec, format: SubtitleFormat) -> String {
    let file = chunk.chunk_id.as_str().replace([':', '/', '@'], "_");
    format!(
        "{}/{}/{}.{}",
        prefix.trim_end_matches('/'),
        chunk.video_id,
        file,
        format.extension()
    )
}

/// Render the chunk's segments. Segments with no text are dropped; cue times
/// are positions in the full video.
pub fn render(
    chunk: &ChunkSpec,
    segments: &[Segment],
    format: SubtitleFormat,
    prefix: &str,
) -> SubtitleArtifact {
    let mut content = String::new();
    if format == SubtitleFormat::Vtt {
        content.push_str("WEBVTT\n\n");
    }

    let mut cues = 0u32;
    for segment in segments.iter().filter(|s| !s.text.trim().is_empty()) {
        cues += 1;
        if format == SubtitleFormat::Srt {
            content.push_str(&format!("{}\n", cues));
        }
        content.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_cue_time(segment.start, format),
            format_cue_time(segment.end.max(segment.start), format),
            segment.text.trim()
        ));
    }

    SubtitleArtifact {
        chunk_id: chunk.chunk_id.clone(),
        format,
        path: artifact_path(prefix, chunk, format),
        content,
        cue_count: cues,
    }
}
