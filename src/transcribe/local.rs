//! Local transcription: ffmpeg audio extraction followed by a recognizer CLI.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    clean_segments, joined_text, RawSegment, SpeechEngine, Transcript, TranscribeError,
};
use crate::config::WhisperConfig;

const MIN_BASE_TIMEOUT_MS: u64 = 30_000;
const MAX_TIMEOUT_MS: u64 = 4 * 60 * 60 * 1000;
const TIMEOUT_PADDING_SECS: f64 = 90.0;

pub struct LocalEngine {
    cfg: WhisperConfig,
    quiet: bool,
}

impl LocalEngine {
    pub fn new(cfg: WhisperConfig, quiet: bool) -> Self {
        Self { cfg, quiet }
    }

    /// Ask ffprobe for the audio duration. Any probe failure simply means
    /// the adaptive timeout falls back to the configured base.
    async fn probe_duration_secs(&self, media: &Path) -> Option<f64> {
        let mut probe = Command::new(&self.cfg.ffprobe_binary);
        probe
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media);

        match run_tool(&self.cfg.ffprobe_binary, &mut probe, None).await {
            Ok(stdout) => stdout
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0),
            Err(err) => {
                debug!("Audio duration probe unavailable: {}", err);
                None
            }
        }
    }
}

#[async_trait]
impl SpeechEngine for LocalEngine {
    fn wants_remote_url(&self) -> bool {
        false
    }

    async fn transcribe<'a>(
        &self,
        local_path: &Path,
        _remote_url: Option<&'a str>,
    ) -> Result<Transcript, TranscribeError> {
        let workdir = TempDir::new()?;
        let wav_path = workdir.path().join("audio.wav");

        info!("Extracting audio track from {}", local_path.display());
        let mut extract = Command::new(&self.cfg.ffmpeg_binary);
        extract.args(extraction_args(local_path, &wav_path));
        run_tool(&self.cfg.ffmpeg_binary, &mut extract, None).await?;

        let duration = self.probe_duration_secs(&wav_path).await;
        let timeout_ms = effective_timeout_ms(
            self.cfg.timeout_ms,
            duration,
            &self.cfg.model,
            self.cfg.device.as_deref(),
        );
        debug!(
            "Transcription ceiling set to {}s (probed duration: {:?})",
            timeout_ms / 1000,
            duration
        );

        let progress = if self.quiet {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap(),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner.set_message(format!("Transcribing with {} model...", self.cfg.model));
            spinner
        };

        let mut recognize = Command::new(&self.cfg.binary);
        recognize.args(recognizer_args(&self.cfg, &wav_path, workdir.path()));
        let recognized = run_tool(&self.cfg.binary, &mut recognize, Some(timeout_ms)).await;
        progress.finish_and_clear();

        match recognized {
            Err(TranscribeError::ToolFailed {
                tool,
                exit_code,
                stderr,
            }) => {
                if names_missing_ffmpeg(&stderr) {
                    return Err(TranscribeError::MissingToolDependency {
                        tool,
                        dependency: "ffmpeg".to_string(),
                    });
                }
                return Err(TranscribeError::ToolFailed {
                    tool,
                    exit_code,
                    stderr,
                });
            }
            Err(err) => return Err(err),
            Ok(_) => {}
        }

        let artifact_path = wav_path.with_extension("json");
        let raw = fs_err::read_to_string(&artifact_path).map_err(|_| {
            TranscribeError::BadArtifact(format!(
                "recognizer wrote no artifact at {}",
                artifact_path.display()
            ))
        })?;

        let transcript = parse_artifact(&raw)?;
        info!(
            "Local transcription produced {} segment(s)",
            transcript.segments.len()
        );
        Ok(transcript)
    }
}

/// ffmpeg arguments for mono 16kHz PCM extraction.
fn extraction_args(video: &Path, wav: &Path) -> Vec<OsString> {
    vec![
        "-i".into(),
        video.into(),
        "-vn".into(),
        "-acodec".into(),
        "pcm_s16le".into(),
        "-ar".into(),
        "16000".into(),
        "-ac".into(),
        "1".into(),
        "-y".into(),
        wav.into(),
    ]
}

/// Recognizer arguments in its documented order.
fn recognizer_args(cfg: &WhisperConfig, audio: &Path, out_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        audio.into(),
        "--model".into(),
        cfg.model.as_str().into(),
        "--output_format".into(),
        "json".into(),
        "--output_dir".into(),
        out_dir.into(),
        "--task".into(),
        "transcribe".into(),
        "--temperature".into(),
        cfg.temperature.to_string().into(),
        "--beam_size".into(),
        cfg.beam_size.to_string().into(),
    ];
    if let Some(language) = &cfg.language {
        args.push("--language".into());
        args.push(language.as_str().into());
    }
    if let Some(device) = &cfg.device {
        args.push("--device".into());
        args.push(device.as_str().into());
    }
    args
}

/// Run an external tool to completion, distinguishing a missing executable,
/// a timeout (process killed) and a non-zero exit. Returns captured stdout.
async fn run_tool(
    tool: &str,
    command: &mut Command,
    timeout_ms: Option<u64>,
) -> Result<String, TranscribeError> {
    command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(TranscribeError::ToolMissing {
                tool: tool.to_string(),
            });
        }
        Err(err) => return Err(TranscribeError::Io(err)),
    };

    let output = match timeout_ms {
        Some(ms) => {
            match tokio::time::timeout(Duration::from_millis(ms), child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => return Err(TranscribeError::Timeout { waited_ms: ms }),
            }
        }
        None => child.wait_with_output().await?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscribeError::ToolFailed {
            tool: tool.to_string(),
            exit_code: output.status.code(),
            stderr: stderr_tail(&stderr),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The recognizer failing because it cannot find ffmpeg itself deserves a
/// clearer message than a generic exit code.
fn names_missing_ffmpeg(stderr: &str) -> bool {
    let text = stderr.to_lowercase();
    text.contains("ffmpeg") && (text.contains("not found") || text.contains("no such file"))
}

fn stderr_tail(stderr: &str) -> String {
    let tail: Vec<&str> = stderr.trim().lines().rev().take(5).collect();
    tail.into_iter().rev().collect::<Vec<_>>().join("\n")
}

fn parse_artifact(raw: &str) -> Result<Transcript, TranscribeError> {
    let artifact: RecognizerArtifact =
        serde_json::from_str(raw).map_err(|err| TranscribeError::BadArtifact(err.to_string()))?;

    let segments = clean_segments(artifact.segments.into_iter().map(Into::into).collect());
    let text = match artifact.text {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => joined_text(&segments),
    };

    Ok(Transcript {
        text,
        segments,
        keyframes: Vec::new(),
        language: artifact.language,
    })
}

#[derive(Debug, serde::Deserialize)]
struct RecognizerArtifact {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    language: Option<String>,
}

fn model_multiplier(model: &str) -> f64 {
    let name = model.to_lowercase();
    if name.starts_with("tiny") {
        1.8
    } else if name.starts_with("base") {
        2.5
    } else if name.starts_with("small") {
        3.5
    } else if name.starts_with("medium") {
        5.5
    } else {
        8.0
    }
}

fn device_factor(device: Option<&str>) -> f64 {
    match device {
        Some(d) if d.eq_ignore_ascii_case("cuda") => 0.75,
        _ => 1.0,
    }
}

/// Transcription ceiling: scales with probed audio duration, never below the
/// configured base, never above four hours. Without a probe the base applies
/// unmodified.
pub(crate) fn effective_timeout_ms(
    configured_ms: u64,
    duration_secs: Option<f64>,
    model: &str,
    device: Option<&str>,
) -> u64 {
    let base = configured_ms.max(MIN_BASE_TIMEOUT_MS);
    let duration = match duration_secs {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => return base,
    };

    let estimate =
        ((duration * model_multiplier(model) * device_factor(device) + TIMEOUT_PADDING_SECS)
            * 1000.0)
            .ceil();
    let clamped = estimate.max(base as f64).min(MAX_TIMEOUT_MS as f64);
    clamped as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_falls_back_to_base_without_probe() {
        assert_eq!(effective_timeout_ms(600_000, None, "base", None), 600_000);
        // The floor applies when the configured value is below it.
        assert_eq!(effective_timeout_ms(5_000, None, "base", None), 30_000);
    }

    #[test]
    fn timeout_scales_with_model_and_device() {
        // 60s of audio, tiny model on cuda: (60 * 1.8 * 0.75 + 90) * 1000
        assert_eq!(
            effective_timeout_ms(30_000, Some(60.0), "tiny", Some("cuda")),
            171_000
        );
        // 600s of audio, base model on cpu: (600 * 2.5 + 90) * 1000
        assert_eq!(
            effective_timeout_ms(30_000, Some(600.0), "base", None),
            1_590_000
        );
    }

    #[test]
    fn timeout_never_exceeds_four_hours() {
        assert_eq!(
            effective_timeout_ms(30_000, Some(1e9), "large-v3", None),
            MAX_TIMEOUT_MS
        );
    }

    #[test]
    fn timeout_never_shrinks_below_configured_base() {
        assert_eq!(
            effective_timeout_ms(600_000, Some(1.0), "tiny", Some("cuda")),
            600_000
        );
    }

    #[test]
    fn timeout_is_monotonic_in_duration() {
        let mut last = 0;
        for secs in [10.0, 60.0, 300.0, 1800.0, 7200.0, 100_000.0] {
            let timeout = effective_timeout_ms(30_000, Some(secs), "medium", None);
            assert!(timeout >= last, "timeout shrank at {}s", secs);
            last = timeout;
        }
    }

    #[test]
    fn model_multiplier_steps_by_size_prefix() {
        assert_eq!(model_multiplier("tiny"), 1.8);
        assert_eq!(model_multiplier("base.en"), 2.5);
        assert_eq!(model_multiplier("small"), 3.5);
        assert_eq!(model_multiplier("medium.en"), 5.5);
        assert_eq!(model_multiplier("large-v3"), 8.0);
        assert_eq!(model_multiplier("some-finetune"), 8.0);
    }

    #[test]
    fn recognizer_invocation_matches_contract() {
        let cfg = WhisperConfig {
            model: "small".to_string(),
            language: Some("zh".to_string()),
            device: Some("cuda".to_string()),
            ..Default::default()
        };
        let args = recognizer_args(&cfg, Path::new("/work/audio.wav"), Path::new("/work"));
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            [
                "/work/audio.wav",
                "--model",
                "small",
                "--output_format",
                "json",
                "--output_dir",
                "/work",
                "--task",
                "transcribe",
                "--temperature",
                "0",
                "--beam_size",
                "5",
                "--language",
                "zh",
                "--device",
                "cuda",
            ]
        );
    }

    #[test]
    fn extraction_produces_mono_16k_pcm() {
        let args = extraction_args(Path::new("in.mp4"), Path::new("out.wav"));
        let rendered: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            [
                "-i", "in.mp4", "-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y",
                "out.wav",
            ]
        );
    }

    #[test]
    fn artifact_with_top_level_text_wins() {
        let transcript = parse_artifact(
            r#"{"text": "hello world", "segments": [{"start": 0.0, "end": 1.5, "text": "hello world"}], "language": "en"}"#,
        )
        .unwrap();
        assert_eq!(transcript.text, "hello world");
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.language.as_deref(), Some("en"));
    }

    #[test]
    fn artifact_without_text_joins_segments() {
        let transcript = parse_artifact(
            r#"{"segments": [{"start": 0.0, "end": 1.0, "text": " first"}, {"start": 1.0, "end": 2.0, "text": "second "}]}"#,
        )
        .unwrap();
        assert_eq!(transcript.text, "first second");
    }

    #[test]
    fn artifact_segments_missing_timestamps_are_dropped() {
        let transcript = parse_artifact(
            r#"{"segments": [{"start": 0.0, "end": 1.0, "text": "keep"}, {"end": 5.0, "text": "no start"}, {"start": 2.0, "end": 1.0, "text": "backwards"}]}"#,
        )
        .unwrap();
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.text, "keep");
    }

    #[test]
    fn garbage_artifact_is_rejected() {
        let err = parse_artifact("{not json").unwrap_err();
        assert!(matches!(err, TranscribeError::BadArtifact(_)));
        assert_eq!(err.code(), "BAD_TRANSCRIPT");
    }

    #[test]
    fn recognizer_stderr_naming_ffmpeg_is_flagged() {
        assert!(names_missing_ffmpeg(
            "FileNotFoundError: [Errno 2] No such file or directory: 'ffmpeg'"
        ));
        assert!(names_missing_ffmpeg("Error: ffmpeg not found on PATH"));
        assert!(!names_missing_ffmpeg("CUDA out of memory"));
        assert!(!names_missing_ffmpeg("ffmpeg exited with code 1"));
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let noisy = (1..=12)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(
            stderr_tail(&noisy),
            "line 8\nline 9\nline 10\nline 11\nline 12"
        );
    }

    #[tokio::test]
    async fn missing_executable_is_distinguished() {
        let mut command = Command::new("/nonexistent/clipnote-recognizer");
        let err = run_tool("/nonexistent/clipnote-recognizer", &mut command, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::ToolMissing { .. }));
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
    }
}
