//! Stream downloader with anti-hotlinking headers and bounded retries.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{header, Client, StatusCode};
use tracing::{info, warn};

use crate::config::{DEFAULT_REFERER, DEFAULT_USER_AGENT};
use crate::utils::{error_chain, format_file_size, is_transient_error};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download failed after {attempts} attempt(s): {reason}")]
    Exhausted { attempts: u32, reason: String },
    #[error("stream responded with HTTP {status}")]
    Status { status: u16 },
    #[error("could not fetch stream: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    pub fn code(&self) -> &'static str {
        match self {
            DownloadError::Exhausted { .. } => "RETRIES_EXHAUSTED",
            DownloadError::Status { .. } => "HTTP_STATUS",
            DownloadError::Transport(_) => "NETWORK_ERROR",
            DownloadError::Io(_) => "IO_ERROR",
        }
    }
}

/// Request options for one download.
///
/// The referer and user agent are mandatory on stream CDNs; requests
/// without them are rejected as hotlinking.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub referer: String,
    pub user_agent: String,
    /// Attempts allowed beyond the first request.
    pub retry_limit: u32,
    /// Base backoff delay, doubled per attempt.
    pub retry_base_delay: Duration,
    pub quiet: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            referer: DEFAULT_REFERER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_limit: 3,
            retry_base_delay: Duration::from_millis(750),
            quiet: false,
        }
    }
}

enum RequestFailure {
    Transient(String),
    Status(u16),
    Fatal(String),
}

/// Download `url` into `dest`, creating parent directories as needed.
/// Returns the number of bytes written.
pub async fn download_to_file(
    http: &Client,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<u64, DownloadError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }

    let mut attempt: u32 = 0;
    let response = loop {
        match send_request(http, url, options).await {
            Ok(response) => break response,
            Err(RequestFailure::Transient(reason)) if attempt < options.retry_limit => {
                let delay = options.retry_base_delay * 2u32.pow(attempt);
                warn!(
                    "Download attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    reason,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(RequestFailure::Transient(reason)) => {
                return Err(DownloadError::Exhausted {
                    attempts: attempt + 1,
                    reason,
                });
            }
            Err(RequestFailure::Status(status)) => {
                return Err(DownloadError::Status { status });
            }
            Err(RequestFailure::Fatal(reason)) => {
                return Err(DownloadError::Transport(reason));
            }
        }
    };

    let progress = if options.quiet {
        ProgressBar::hidden()
    } else {
        make_progress(response.content_length())
    };

    let mut file = fs_err::File::create(dest)?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| DownloadError::Transport(error_chain(&err)))?;
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
        progress.set_position(written);
    }
    file.flush()?;
    progress.finish_and_clear();

    info!(
        "Downloaded {} to {}",
        format_file_size(written),
        dest.display()
    );
    Ok(written)
}

async fn send_request(
    http: &Client,
    url: &str,
    options: &DownloadOptions,
) -> Result<reqwest::Response, RequestFailure> {
    let result = http
        .get(url)
        .header(header::REFERER, &options.referer)
        .header(header::USER_AGENT, &options.user_agent)
        .send()
        .await;

    let response = match result {
        Ok(response) => response,
        Err(err) if is_transient_error(&err) => {
            return Err(RequestFailure::Transient(error_chain(&err)));
        }
        Err(err) => return Err(RequestFailure::Fatal(error_chain(&err))),
    };

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RequestFailure::Transient(format!("HTTP {}", status)));
    }
    Err(RequestFailure::Status(status.as_u16()))
}

fn make_progress(total: Option<u64>) -> ProgressBar {
    match total {
        Some(length) => {
            let progress = ProgressBar::new(length);
            progress.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                    .unwrap()
            );
            progress.set_message("Downloading media...");
            progress
        }
        None => {
            let progress = ProgressBar::new_spinner();
            progress.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
                    .unwrap(),
            );
            progress.set_message("Downloading media...");
            progress
        }
    }
}
