//! Link resolution: from a pasted share URL to playable streams.
//!
//! Resolution runs as a fixed sequence of stages (normalize, extract,
//! metadata, playurl, synthesize). Each stage either advances with typed
//! data or stops the run with a [`ParseError`] naming the stage, a stable
//! machine-readable code, and a human-readable message.

pub mod extract;
pub mod metadata;
pub mod normalize;
pub mod playurl;
pub mod streams;
pub mod wire;

use std::fmt;
use std::time::Duration;

use reqwest::header;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::BilibiliConfig;
use crate::utils::{error_chain, is_transient_error};

pub use extract::{VideoId, VideoIdentifier};
pub use playurl::{FormatFlags, StreamRequest};
pub use streams::{AudioTrack, StreamMedia, StreamOption, VideoTrack};
pub use wire::WireError;

/// Stages of the resolution sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStage {
    Normalize,
    Extract,
    Metadata,
    Playurl,
    Synthesize,
}

impl ParseStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStage::Normalize => "normalize",
            ParseStage::Extract => "extract",
            ParseStage::Metadata => "metadata",
            ParseStage::Playurl => "playurl",
            ParseStage::Synthesize => "synthesize",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normalize" => Some(ParseStage::Normalize),
            "extract" => Some(ParseStage::Extract),
            "metadata" => Some(ParseStage::Metadata),
            "playurl" => Some(ParseStage::Playurl),
            "synthesize" => Some(ParseStage::Synthesize),
            _ => None,
        }
    }
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error code: either a numeric platform code passed
/// through unchanged, or a symbolic tag minted by this crate.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    Api(i64),
    Tag(String),
}

impl ErrorCode {
    pub fn tag(tag: &str) -> Self {
        ErrorCode::Tag(tag.to_string())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Api(code) => write!(f, "{}", code),
            ErrorCode::Tag(tag) => f.write_str(tag),
        }
    }
}

/// A resolution failure, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} failed ({code}): {message}")]
pub struct ParseError {
    pub stage: ParseStage,
    pub code: ErrorCode,
    pub message: String,
}

impl ParseError {
    pub fn new(stage: ParseStage, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn tagged(stage: ParseStage, tag: &str, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorCode::tag(tag), message)
    }

    pub(crate) fn api(stage: ParseStage, code: i64, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorCode::Api(code), message)
    }
}

/// A fully resolved video: identity fields plus every playable stream option.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVideo {
    pub title: String,
    pub bvid: String,
    pub aid: u64,
    /// Stream identifier of the selected part.
    pub cid: i64,
    /// 1-based part index the caller asked for.
    pub part: u32,
    /// Duration of the selected part in seconds.
    pub duration_secs: f64,
    pub streams: Vec<StreamOption>,
}

/// Outcome of one resolution run. Serializes to a single tagged wire
/// object with exactly one of the two payloads populated (see [`wire`]).
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Success(ParsedVideo),
    Failure(ParseError),
}

impl ParseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success(_))
    }

    pub fn into_result(self) -> Result<ParsedVideo, ParseError> {
        match self {
            ParseResult::Success(video) => Ok(video),
            ParseResult::Failure(err) => Err(err),
        }
    }

    pub fn to_json(&self) -> Result<String, WireError> {
        wire::to_json(self)
    }

    pub fn from_json(json: &str) -> Result<Self, WireError> {
        wire::from_json(json)
    }
}

impl From<Result<ParsedVideo, ParseError>> for ParseResult {
    fn from(result: Result<ParsedVideo, ParseError>) -> Self {
        match result {
            Ok(video) => ParseResult::Success(video),
            Err(err) => ParseResult::Failure(err),
        }
    }
}

/// Resolves share links against the Bilibili web API.
pub struct Resolver {
    http: reqwest::Client,
    cfg: BilibiliConfig,
}

impl Resolver {
    pub fn new(cfg: BilibiliConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(
                normalize::MAX_REDIRECT_HOPS,
            ))
            .build()?;
        Ok(Self { http, cfg })
    }

    /// Run the full resolution sequence for one link.
    pub async fn resolve(&self, raw_url: &str, request: &StreamRequest) -> ParseResult {
        self.run(raw_url, request).await.into()
    }

    async fn run(
        &self,
        raw_url: &str,
        request: &StreamRequest,
    ) -> Result<ParsedVideo, ParseError> {
        let canonical = normalize::UrlNormalizer::bilibili(self.http.clone())
            .normalize(raw_url)
            .await?;
        debug!(url = %canonical, "canonical URL resolved");

        let ident = extract::identify(&canonical)?;
        let meta = metadata::fetch(&self.http, &self.cfg, &ident).await?;
        debug!(bvid = %meta.bvid, cid = meta.cid, part = ident.part, "video metadata fetched");

        let play = playurl::fetch(&self.http, &self.cfg, &meta, request).await?;
        let streams = streams::synthesize(&play)?;

        Ok(ParsedVideo {
            title: meta.title,
            bvid: meta.bvid,
            aid: meta.aid,
            cid: meta.cid,
            part: ident.part,
            duration_secs: meta.duration_secs,
            streams,
        })
    }
}

/// Standard platform API envelope: `code` 0 means success, anything else
/// is a domain error described by the code table below.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Fixed wording for the platform's documented error codes.
pub(crate) fn describe_api_code(code: i64) -> String {
    match code {
        -400 => "Invalid request".to_string(),
        -403 => "Access denied".to_string(),
        -404 => "Video is deleted or does not exist".to_string(),
        -412 => "Request was rejected by the rate limiter, try again later".to_string(),
        62002 => "Video is invisible".to_string(),
        62004 => "Video is under review".to_string(),
        62012 => "Video is only visible to its uploader".to_string(),
        other => format!("API error: {}", other),
    }
}

enum SendFailure {
    Transient(String),
    Fatal(ParseError),
}

/// GET an API endpoint and unwrap its envelope, retrying transient
/// transport failures and 429/5xx responses with exponential backoff.
pub(crate) async fn call_api<T: DeserializeOwned>(
    http: &reqwest::Client,
    cfg: &BilibiliConfig,
    stage: ParseStage,
    url: &str,
) -> Result<T, ParseError> {
    let mut attempt: u32 = 0;
    loop {
        match send_once::<T>(http, cfg, stage, url).await {
            Ok(data) => return Ok(data),
            Err(SendFailure::Transient(reason)) if attempt < cfg.retries => {
                let delay = Duration::from_millis(cfg.retry_delay_ms * 2u64.pow(attempt));
                warn!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "API request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(SendFailure::Transient(reason)) => {
                return Err(ParseError::tagged(stage, "NETWORK_ERROR", reason));
            }
            Err(SendFailure::Fatal(err)) => return Err(err),
        }
    }
}

async fn send_once<T: DeserializeOwned>(
    http: &reqwest::Client,
    cfg: &BilibiliConfig,
    stage: ParseStage,
    url: &str,
) -> Result<T, SendFailure> {
    let mut request = http
        .get(url)
        .header(header::USER_AGENT, &cfg.user_agent)
        .header(header::REFERER, &cfg.referer);
    if let Some(sessdata) = &cfg.sessdata {
        request = request.header(header::COOKIE, format!("SESSDATA={}", sessdata));
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) if is_transient_error(&err) => {
            return Err(SendFailure::Transient(error_chain(&err)));
        }
        Err(err) => {
            return Err(SendFailure::Fatal(ParseError::tagged(
                stage,
                "NETWORK_ERROR",
                error_chain(&err),
            )));
        }
    };

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(SendFailure::Transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(SendFailure::Fatal(ParseError::tagged(
            stage,
            "NETWORK_ERROR",
            format!("HTTP {} from the API", status.as_u16()),
        )));
    }

    let envelope: ApiEnvelope<T> = response.json().await.map_err(|err| {
        SendFailure::Fatal(ParseError::tagged(
            stage,
            "INVALID_RESPONSE",
            format!("could not decode API response: {}", error_chain(&err)),
        ))
    })?;

    if envelope.code != 0 {
        debug!(code = envelope.code, platform_message = %envelope.message, "API returned an error code");
        return Err(SendFailure::Fatal(ParseError::api(
            stage,
            envelope.code,
            describe_api_code(envelope.code),
        )));
    }

    envelope.data.ok_or_else(|| {
        SendFailure::Fatal(ParseError::tagged(
            stage,
            "INVALID_RESPONSE",
            "API response carried no data payload",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_code_table_is_stable() {
        assert_eq!(describe_api_code(-404), "Video is deleted or does not exist");
        assert_eq!(describe_api_code(-400), "Invalid request");
        assert_eq!(describe_api_code(-403), "Access denied");
        assert_eq!(describe_api_code(62004), "Video is under review");
        assert_eq!(describe_api_code(9999), "API error: 9999");
        assert_eq!(describe_api_code(-999), "API error: -999");
    }

    #[test]
    fn error_code_displays_both_shapes() {
        assert_eq!(ErrorCode::Api(-404).to_string(), "-404");
        assert_eq!(ErrorCode::tag("INVALID_URL").to_string(), "INVALID_URL");
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in [
            ParseStage::Normalize,
            ParseStage::Extract,
            ParseStage::Metadata,
            ParseStage::Playurl,
            ParseStage::Synthesize,
        ] {
            assert_eq!(ParseStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(ParseStage::parse("download"), None);
    }

    #[test]
    fn parse_result_exposes_exactly_one_branch() {
        let failure = ParseResult::Failure(ParseError::tagged(
            ParseStage::Normalize,
            "INVALID_URL",
            "not a URL",
        ));
        assert!(!failure.is_success());
        assert!(failure.into_result().is_err());
    }
}
