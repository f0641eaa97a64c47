//! Cloud transcription: submit a job for the uploaded media URL, poll it to
//! a terminal state, then fetch the structured result it references.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    clean_segments, joined_text, Keyframe, RawSegment, SpeechEngine, Transcript, TranscribeError,
};
use crate::config::CloudConfig;
use crate::utils::error_chain;

const MAX_POLL_WAIT_SECS: u64 = 30;

pub struct CloudEngine {
    http: Client,
    cfg: CloudConfig,
    quiet: bool,
}

#[derive(Debug, Deserialize)]
struct JobEnvelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitReceipt {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    result_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResult {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    keyframes: Vec<ResultKeyframe>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultKeyframe {
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    start_secs: Option<f64>,
}

impl CloudEngine {
    pub fn new(http: Client, cfg: CloudConfig, quiet: bool) -> Self {
        Self { http, cfg, quiet }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.api_base.trim_end_matches('/'), path)
    }

    async fn submit(&self, media_url: &str) -> Result<String, TranscribeError> {
        let receipt: SubmitReceipt = self
            .call(
                self.http
                    .post(self.endpoint("api/v1/tasks"))
                    .json(&serde_json::json!({ "url": media_url })),
            )
            .await?;
        info!("Submitted transcription job {}", receipt.task_id);
        Ok(receipt.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobStatus, TranscribeError> {
        self.call(
            self.http
                .get(self.endpoint(&format!("api/v1/tasks/{}", task_id))),
        )
        .await
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TranscribeError> {
        let response = request
            .bearer_auth(&self.cfg.app_key)
            .send()
            .await
            .map_err(|err| TranscribeError::Network(error_chain(&err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranscribeError::Rejected {
                code: status.as_u16() as i64,
                message: format!("HTTP {}", status),
            });
        }

        let envelope: JobEnvelope<T> = response
            .json()
            .await
            .map_err(|err| TranscribeError::BadResponse(error_chain(&err)))?;

        if envelope.code != 0 {
            return Err(TranscribeError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| TranscribeError::BadResponse("missing data payload".to_string()))
    }

    async fn fetch_result(&self, result_url: &str) -> Result<Transcript, TranscribeError> {
        let response = self
            .http
            .get(result_url)
            .send()
            .await
            .map_err(|err| TranscribeError::Network(error_chain(&err)))?;

        if !response.status().is_success() {
            return Err(TranscribeError::BadResponse(format!(
                "result fetch returned HTTP {}",
                response.status()
            )));
        }

        let result: JobResult = response
            .json()
            .await
            .map_err(|err| TranscribeError::BadResponse(error_chain(&err)))?;

        let segments = clean_segments(result.segments.into_iter().map(Into::into).collect());
        let text = match result.text {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => joined_text(&segments),
        };
        let keyframes = result
            .keyframes
            .into_iter()
            .filter(|k| !k.image_url.is_empty())
            .map(|k| Keyframe {
                image_url: k.image_url,
                description: k.description,
                start_secs: k.start_secs,
            })
            .collect();

        Ok(Transcript {
            text,
            segments,
            keyframes,
            language: result.language,
        })
    }
}

#[async_trait]
impl SpeechEngine for CloudEngine {
    fn wants_remote_url(&self) -> bool {
        true
    }

    async fn transcribe<'a>(
        &self,
        _local_path: &Path,
        remote_url: Option<&'a str>,
    ) -> Result<Transcript, TranscribeError> {
        let media_url = remote_url.ok_or(TranscribeError::MissingRemoteUrl)?;
        let task_id = self.submit(media_url).await?;

        let progress = if self.quiet {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap(),
            );
            spinner.set_message("Waiting for transcription job...");
            spinner
        };

        let started = Instant::now();
        let ceiling = Duration::from_secs(self.cfg.poll_ceiling_secs);
        let mut check: u32 = 0;

        let status = loop {
            check += 1;
            let status = self.poll(&task_id).await?;

            match status.status.as_str() {
                "SUCCESS" => break status,
                "FAILED" => {
                    progress.finish_and_clear();
                    return Err(TranscribeError::JobFailed(
                        status.reason.unwrap_or_else(|| "unknown reason".to_string()),
                    ));
                }
                other => {
                    debug!("Job {} still {} (check #{})", task_id, other, check);
                }
            }

            if started.elapsed() >= ceiling {
                progress.finish_and_clear();
                return Err(TranscribeError::JobTimeout {
                    ceiling_secs: self.cfg.poll_ceiling_secs,
                });
            }

            progress.set_message(format!(
                "Transcribing... ({}s elapsed, check #{})",
                started.elapsed().as_secs(),
                check
            ));
            tokio::time::sleep(Duration::from_secs(poll_wait_secs(
                self.cfg.poll_interval_secs,
                check,
            )))
            .await;
        };
        progress.finish_and_clear();

        let result_url = status.result_url.ok_or_else(|| {
            TranscribeError::BadResponse("completed job carried no result reference".to_string())
        })?;
        self.fetch_result(&result_url).await
    }
}

/// Wait before the next status check: the configured interval, growing 2s
/// per check, capped at 30s.
fn poll_wait_secs(interval_secs: u64, check: u32) -> u64 {
    (interval_secs + 2 * check.saturating_sub(1) as u64).min(MAX_POLL_WAIT_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn test_engine(server: &Server, ceiling_secs: u64) -> CloudEngine {
        CloudEngine::new(
            Client::new(),
            CloudConfig {
                api_base: server.url(),
                app_key: "test-app-key".to_string(),
                poll_interval_secs: 0,
                poll_ceiling_secs: ceiling_secs,
            },
            true,
        )
    }

    #[test]
    fn poll_wait_follows_backoff_curve() {
        assert_eq!(poll_wait_secs(5, 1), 5);
        assert_eq!(poll_wait_secs(5, 2), 7);
        assert_eq!(poll_wait_secs(5, 3), 9);
        assert_eq!(poll_wait_secs(5, 14), 30);
        assert_eq!(poll_wait_secs(5, 100), 30);
    }

    #[tokio::test]
    async fn completed_job_yields_transcript_with_keyframes() {
        let mut server = Server::new_async().await;
        let submit = server
            .mock("POST", "/api/v1/tasks")
            .match_header("authorization", "Bearer test-app-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "url": "https://store.example/media/clip.mp4"
            })))
            .with_status(200)
            .with_body(r#"{"code": 0, "data": {"taskId": "task-1"}}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/api/v1/tasks/task-1")
            .with_status(200)
            .with_body(format!(
                r#"{{"code": 0, "data": {{"status": "SUCCESS", "resultUrl": "{}/results/task-1.json"}}}}"#,
                server.url()
            ))
            .create_async()
            .await;
        let result = server
            .mock("GET", "/results/task-1.json")
            .with_status(200)
            .with_body(
                r#"{
                    "text": "intro and outline",
                    "segments": [{"start": 0.0, "end": 4.0, "text": "intro"}],
                    "keyframes": [{"imageUrl": "https://img.example/f1.png", "description": "title slide", "startSecs": 1.0}]
                }"#,
            )
            .create_async()
            .await;

        let engine = test_engine(&server, 1800);
        let transcript = engine
            .transcribe(
                Path::new("/tmp/clip.mp4"),
                Some("https://store.example/media/clip.mp4"),
            )
            .await
            .unwrap();

        assert_eq!(transcript.text, "intro and outline");
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.keyframes.len(), 1);
        assert_eq!(
            transcript.keyframes[0].description.as_deref(),
            Some("title slide")
        );
        submit.assert_async().await;
        poll.assert_async().await;
        result.assert_async().await;
    }

    #[tokio::test]
    async fn failed_job_reports_its_reason() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/tasks")
            .with_status(200)
            .with_body(r#"{"code": 0, "data": {"taskId": "task-2"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/v1/tasks/task-2")
            .with_status(200)
            .with_body(r#"{"code": 0, "data": {"status": "FAILED", "reason": "unsupported codec"}}"#)
            .create_async()
            .await;

        let engine = test_engine(&server, 1800);
        let err = engine
            .transcribe(Path::new("/tmp/clip.mp4"), Some("https://m.example/c.mp4"))
            .await
            .unwrap_err();

        match err {
            TranscribeError::JobFailed(reason) => assert!(reason.contains("unsupported codec")),
            other => panic!("expected JobFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn job_stuck_pending_hits_the_ceiling() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/tasks")
            .with_status(200)
            .with_body(r#"{"code": 0, "data": {"taskId": "task-3"}}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/api/v1/tasks/task-3")
            .with_status(200)
            .with_body(r#"{"code": 0, "data": {"status": "PENDING"}}"#)
            .expect(1)
            .create_async()
            .await;

        let engine = test_engine(&server, 0);
        let err = engine
            .transcribe(Path::new("/tmp/clip.mp4"), Some("https://m.example/c.mp4"))
            .await
            .unwrap_err();

        assert!(matches!(err, TranscribeError::JobTimeout { .. }));
        assert_eq!(err.code(), "JOB_TIMEOUT");
        poll.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_api_code() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/tasks")
            .with_status(200)
            .with_body(r#"{"code": 401, "message": "invalid app key"}"#)
            .create_async()
            .await;

        let engine = test_engine(&server, 1800);
        let err = engine
            .transcribe(Path::new("/tmp/clip.mp4"), Some("https://m.example/c.mp4"))
            .await
            .unwrap_err();

        match err {
            TranscribeError::Rejected { code, message } => {
                assert_eq!(code, 401);
                assert!(message.contains("invalid app key"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}
