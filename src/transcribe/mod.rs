//! Transcription strategies behind a single engine port.
//!
//! Two engines implement [`SpeechEngine`]: a cloud async-job client that
//! consumes the uploaded media URL, and a local ffmpeg+recognizer pipeline
//! that consumes the downloaded file directly.

use std::path::Path;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::config::{Config, EngineKind};

pub mod cloud;
pub mod local;

pub use cloud::CloudEngine;
pub use local::LocalEngine;

/// Transcription result shared by both engines.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    /// Full transcript text
    pub text: String,

    /// Time-ordered segments
    pub segments: Vec<TranscriptSegment>,

    /// Slide keyframes extracted by the cloud service; empty for local runs
    #[serde(default)]
    pub keyframes: Vec<Keyframe>,

    /// Detected or requested language
    #[serde(default)]
    pub language: Option<String>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.segments.is_empty() && self.keyframes.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyframe {
    pub image_url: String,
    pub description: Option<String>,
    pub start_secs: Option<f64>,
}

/// Segment shape emitted by the recognizer artifact and the cloud result.
#[derive(Debug, Deserialize)]
pub(crate) struct RawSegment {
    #[serde(default = "missing_timestamp")]
    pub start: f64,
    #[serde(default = "missing_timestamp")]
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

fn missing_timestamp() -> f64 {
    f64::NAN
}

impl From<RawSegment> for TranscriptSegment {
    fn from(raw: RawSegment) -> Self {
        Self {
            start_secs: raw.start,
            end_secs: raw.end,
            text: raw.text,
        }
    }
}

/// Drop segments that cannot be rendered: non-finite or negative timestamps,
/// end before start, empty text.
pub fn clean_segments(raw: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    raw.into_iter()
        .filter(|s| {
            s.start_secs.is_finite()
                && s.end_secs.is_finite()
                && s.start_secs >= 0.0
                && s.end_secs >= s.start_secs
                && !s.text.trim().is_empty()
        })
        .collect()
}

/// Reconstruct the transcript text by joining segment texts.
pub fn joined_text(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("required tool '{tool}' was not found on PATH")]
    ToolMissing { tool: String },
    #[error("'{tool}' could not find its dependency '{dependency}'")]
    MissingToolDependency { tool: String, dependency: String },
    #[error("transcription timed out after {waited_ms} ms")]
    Timeout { waited_ms: u64 },
    #[error("'{tool}' exited with status {exit_code:?}: {stderr}")]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("transcript artifact was unusable: {0}")]
    BadArtifact(String),
    #[error("could not reach transcription service: {0}")]
    Network(String),
    #[error("transcription service replied with an unexpected payload: {0}")]
    BadResponse(String),
    #[error("transcription service rejected the request ({code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("transcription job did not finish within {ceiling_secs}s")]
    JobTimeout { ceiling_secs: u64 },
    #[error("transcription job failed: {0}")]
    JobFailed(String),
    #[error("no uploaded media URL was available for the cloud engine")]
    MissingRemoteUrl,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TranscribeError {
    pub fn code(&self) -> &'static str {
        match self {
            TranscribeError::ToolMissing { .. } => "TOOL_NOT_FOUND",
            TranscribeError::MissingToolDependency { .. } => "TOOL_DEPENDENCY_MISSING",
            TranscribeError::Timeout { .. } => "TRANSCRIBE_TIMEOUT",
            TranscribeError::ToolFailed { .. } => "TOOL_FAILED",
            TranscribeError::BadArtifact(_) => "BAD_TRANSCRIPT",
            TranscribeError::Network(_) => "NETWORK_ERROR",
            TranscribeError::BadResponse(_) => "INVALID_RESPONSE",
            TranscribeError::Rejected { .. } => "CLOUD_REJECTED",
            TranscribeError::JobTimeout { .. } => "JOB_TIMEOUT",
            TranscribeError::JobFailed(_) => "JOB_FAILED",
            TranscribeError::MissingRemoteUrl => "INTERNAL_ERROR",
            TranscribeError::Io(_) => "IO_ERROR",
        }
    }
}

/// Strategy port the pipeline talks to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Whether this engine consumes the uploaded public URL rather than the
    /// local media file.
    fn wants_remote_url(&self) -> bool;

    async fn transcribe<'a>(
        &self,
        local_path: &Path,
        remote_url: Option<&'a str>,
    ) -> Result<Transcript, TranscribeError>;
}

/// Build the engine selected by the configuration.
pub fn build_engine(config: &Config, http: &reqwest::Client, quiet: bool) -> Box<dyn SpeechEngine> {
    match config.app.engine {
        EngineKind::Cloud => Box::new(CloudEngine::new(
            http.clone(),
            config.cloud.clone(),
            quiet,
        )),
        EngineKind::Local => Box::new(LocalEngine::new(config.whisper.clone(), quiet)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_secs: start,
            end_secs: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn clean_segments_drops_unrenderable_entries() {
        let cleaned = clean_segments(vec![
            segment(0.0, 2.0, "keep"),
            segment(f64::NAN, 3.0, "no start"),
            segment(4.0, f64::INFINITY, "no end"),
            segment(-1.0, 2.0, "negative"),
            segment(5.0, 4.0, "backwards"),
            segment(6.0, 7.0, "   "),
            segment(8.0, 8.0, "zero width is fine"),
        ]);

        let texts: Vec<&str> = cleaned.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["keep", "zero width is fine"]);
    }

    #[test]
    fn joined_text_reconstructs_missing_transcript() {
        let segments = vec![segment(0.0, 1.0, " first"), segment(1.0, 2.0, "second ")];
        assert_eq!(joined_text(&segments), "first second");
    }

    #[test]
    fn empty_transcript_detection_covers_all_content() {
        let mut transcript = Transcript::default();
        assert!(transcript.is_empty());

        transcript.keyframes.push(Keyframe {
            image_url: "https://img.example/f.png".to_string(),
            description: None,
            start_secs: None,
        });
        assert!(!transcript.is_empty());
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            TranscribeError::JobTimeout { ceiling_secs: 60 }.code(),
            "JOB_TIMEOUT"
        );
        assert_eq!(
            TranscribeError::JobFailed("x".to_string()).code(),
            "JOB_FAILED"
        );
        assert_eq!(
            TranscribeError::ToolMissing {
                tool: "ffmpeg".to_string()
            }
            .code(),
            "TOOL_NOT_FOUND"
        );
    }
}
