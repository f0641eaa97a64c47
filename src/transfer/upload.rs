//! Object-store uploads with signed PUT requests.
//!
//! Media lands in a date-partitioned key under the configured prefix and
//! is made publicly readable so the transcription service can fetch it.

use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{header, Client};
use sha1::Sha1;
use tracing::info;
use uuid::Uuid;

use crate::config::OssConfig;
use crate::utils::error_chain;

type HmacSha1 = Hmac<Sha1>;

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("object store rejected the upload with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not reach object store: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::Status { .. } => "UPLOAD_REJECTED",
            UploadError::Transport(_) => "NETWORK_ERROR",
            UploadError::Io(_) => "IO_ERROR",
        }
    }
}

/// Guess a media content type from a file extension.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "mp4" | "m4s" => "video/mp4",
        "flv" => "video/x-flv",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

pub struct OssUploader {
    http: Client,
    cfg: OssConfig,
    quiet: bool,
}

impl OssUploader {
    pub fn new(http: Client, cfg: OssConfig, quiet: bool) -> Self {
        Self { http, cfg, quiet }
    }

    /// Upload a local file under a fresh generated key and return its
    /// public URL.
    pub async fn upload(&self, local_path: &Path) -> Result<String, UploadError> {
        let ext = local_path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let key = self.object_key(ext);
        let content_type = content_type_for(ext);
        self.put_file(local_path, &key, content_type).await
    }

    /// Build a collision-free object key: `{prefix}{yyyymmdd}/{uuid}.{ext}`.
    pub fn object_key(&self, ext: &str) -> String {
        let prefix = match self.cfg.key_prefix.as_deref() {
            None | Some("") => String::new(),
            Some(p) => format!("{}/", p.trim_matches('/')),
        };
        format!(
            "{}{}/{}.{}",
            prefix,
            Utc::now().format("%Y%m%d"),
            Uuid::new_v4().simple(),
            ext.trim_start_matches('.')
        )
    }

    /// Public URL of an object, using virtual-host addressing unless an
    /// explicit endpoint override is configured.
    pub fn public_url(&self, key: &str) -> String {
        match self.cfg.endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => {
                format!("{}/{}", endpoint.trim_end_matches('/'), key)
            }
            _ => format!(
                "https://{}.{}.{}/{}",
                self.cfg.bucket, self.cfg.region, self.cfg.host, key
            ),
        }
    }

    /// PUT a local file to `key` and return the object's public URL.
    pub async fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, UploadError> {
        let body = tokio::fs::read(local_path).await?;
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let resource = format!("/{}/{}", self.cfg.bucket, key);
        let signature = sign(
            &self.cfg.access_key_secret,
            &string_to_sign(content_type, &date, &resource),
        );
        let url = self.public_url(key);

        let progress = if self.quiet {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {msg}")
                    .unwrap(),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner.set_message("Uploading media...");
            spinner
        };

        let result = self
            .http
            .put(&url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::DATE, &date)
            .header("x-oss-acl", "public-read")
            .header(
                header::AUTHORIZATION,
                format!("OSS {}:{}", self.cfg.access_key_id, signature),
            )
            .body(body)
            .send()
            .await;
        progress.finish_and_clear();

        let response = result.map_err(|err| UploadError::Transport(error_chain(&err)))?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!("Uploaded {} to {}", local_path.display(), url);
        Ok(url)
    }
}

/// Canonical string covered by the request signature.
fn string_to_sign(content_type: &str, date: &str, resource: &str) -> String {
    format!(
        "PUT\n\n{}\n{}\nx-oss-acl:public-read\n{}",
        content_type, date, resource
    )
}

fn sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}
