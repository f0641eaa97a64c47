//! Summarization pipeline: one linear run from share link to rendered note.
//!
//! Stages execute strictly in order (parse, download, upload, transcribe,
//! generate, optional ai_call); the first failure stops the run with a
//! [`SummaryError`] naming the stage. Every run owns a scoped working
//! directory, so no downloaded media outlives the call whichever stage it
//! stopped at.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::{Config, EngineKind};
use crate::note::{self, Organizer};
use crate::resolver::{
    ErrorCode, ParseError, ParsedVideo, Resolver, StreamMedia, StreamRequest,
};
use crate::transcribe::{self, SpeechEngine};
use crate::transfer::{download_to_file, DownloadOptions, OssUploader};
use crate::utils::sanitize_filename;

/// Stages of the summarization sequence, in execution order. `Server` and
/// `Validate` mark failures outside the linear flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryStage {
    Parse,
    Download,
    Upload,
    Transcribe,
    Generate,
    AiCall,
    Server,
    Validate,
}

impl SummaryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            SummaryStage::Parse => "parse",
            SummaryStage::Download => "download",
            SummaryStage::Upload => "upload",
            SummaryStage::Transcribe => "transcribe",
            SummaryStage::Generate => "generate",
            SummaryStage::AiCall => "ai_call",
            SummaryStage::Server => "server",
            SummaryStage::Validate => "validate",
        }
    }
}

impl fmt::Display for SummaryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A summarization failure, tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{stage} failed ({code}): {message}")]
pub struct SummaryError {
    pub stage: SummaryStage,
    pub code: ErrorCode,
    pub message: String,
}

impl SummaryError {
    pub fn new(stage: SummaryStage, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            stage,
            code,
            message: message.into(),
        }
    }

    fn tagged(stage: SummaryStage, tag: &str, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorCode::tag(tag), message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::tagged(SummaryStage::Server, "INTERNAL_ERROR", message)
    }
}

/// Resolution failures surface on the summarization side as the parse
/// stage, keeping their original code and message.
impl From<ParseError> for SummaryError {
    fn from(err: ParseError) -> Self {
        Self {
            stage: SummaryStage::Parse,
            code: err.code,
            message: err.message,
        }
    }
}

/// Success payload of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryNote {
    pub title: String,
    pub markdown: String,
    /// AI-organized rendition, when an organizer is configured and it
    /// returned usable content.
    pub summary: Option<String>,
}

impl SummaryNote {
    /// The document to present: the organized rendition when there is one.
    pub fn best_markdown(&self) -> &str {
        self.summary.as_deref().unwrap_or(&self.markdown)
    }
}

/// Outcome of one summarization run, exactly one branch populated.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryResult {
    Success(SummaryNote),
    Failure(SummaryError),
}

impl SummaryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SummaryResult::Success(_))
    }

    pub fn into_result(self) -> Result<SummaryNote, SummaryError> {
        match self {
            SummaryResult::Success(note) => Ok(note),
            SummaryResult::Failure(err) => Err(err),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&RawSummary::from(self))
    }
}

#[derive(Serialize)]
struct RawSummary<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    markdown: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RawSummaryError<'a>>,
}

#[derive(Serialize)]
struct RawSummaryError<'a> {
    stage: &'a str,
    code: RawCode<'a>,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RawCode<'a> {
    Number(i64),
    Text(&'a str),
}

impl<'a> From<&'a SummaryResult> for RawSummary<'a> {
    fn from(result: &'a SummaryResult) -> Self {
        match result {
            SummaryResult::Success(note) => RawSummary {
                success: true,
                title: Some(&note.title),
                markdown: Some(&note.markdown),
                summary: note.summary.as_deref(),
                error: None,
            },
            SummaryResult::Failure(err) => RawSummary {
                success: false,
                title: None,
                markdown: None,
                summary: None,
                error: Some(RawSummaryError {
                    stage: err.stage.as_str(),
                    code: match &err.code {
                        ErrorCode::Api(code) => RawCode::Number(*code),
                        ErrorCode::Tag(tag) => RawCode::Text(tag),
                    },
                    message: &err.message,
                }),
            },
        }
    }
}

/// Scoped working directory for one run. Dropping it removes everything
/// still inside, whichever stage the run stopped at.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn create() -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        debug!("Working directory at {}", dir.path().display());
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now instead of waiting for drop, so a cleanup
    /// failure can at least be logged.
    fn discard(self) {
        if let Err(err) = self.dir.close() {
            warn!("Could not remove the working directory: {}", err);
        }
    }
}

/// Runs the full link-to-note sequence with the engine selected in config.
pub struct NotePipeline {
    config: Config,
    http: reqwest::Client,
    engine: Box<dyn SpeechEngine>,
    quiet: bool,
}

impl NotePipeline {
    pub fn new(config: Config, quiet: bool) -> crate::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        let engine = transcribe::build_engine(&config, &http, quiet);
        Ok(Self {
            config,
            http,
            engine,
            quiet,
        })
    }

    /// Build a pipeline around an already-constructed engine.
    pub(crate) fn assemble(
        config: Config,
        http: reqwest::Client,
        engine: Box<dyn SpeechEngine>,
        quiet: bool,
    ) -> Self {
        Self {
            config,
            http,
            engine,
            quiet,
        }
    }

    /// Run every stage for one link. Always returns exactly one result,
    /// never a partial one.
    pub async fn run(&self, url: &str) -> SummaryResult {
        match self.run_stages(url).await {
            Ok(note) => SummaryResult::Success(note),
            Err(err) => {
                warn!("Summarization stopped at {}: {}", err.stage, err.message);
                SummaryResult::Failure(err)
            }
        }
    }

    async fn run_stages(&self, url: &str) -> Result<SummaryNote, SummaryError> {
        self.check_engine_config()?;

        let resolver = Resolver::new(self.config.bilibili.clone()).map_err(|err| {
            SummaryError::internal(format!("could not build the resolver: {:#}", err))
        })?;
        let request =
            StreamRequest::for_format(self.config.app.quality, &self.config.app.format);
        info!("Resolving {}", url);
        let video = resolver.resolve(url, &request).await.into_result()?;
        info!(
            "Resolved \"{}\" (part {}, {} stream option(s))",
            video.title,
            video.part,
            video.streams.len()
        );

        let workspace = Workspace::create().map_err(|err| {
            SummaryError::internal(format!("could not create a working directory: {}", err))
        })?;

        let pick = pick_media(&video).ok_or_else(|| {
            SummaryError::tagged(
                SummaryStage::Download,
                "NO_STREAMS",
                "resolved stream options carried no downloadable URL",
            )
        })?;
        info!("Downloading the {} ({})", pick.label, pick.quality_label);
        let media_path = workspace.path().join(format!("media.{}", pick.extension));
        let options = DownloadOptions {
            referer: self.config.bilibili.referer.clone(),
            user_agent: self.config.bilibili.user_agent.clone(),
            quiet: self.quiet,
            ..DownloadOptions::default()
        };
        download_to_file(&self.http, &pick.url, &media_path, &options)
            .await
            .map_err(|err| {
                SummaryError::tagged(SummaryStage::Download, err.code(), err.to_string())
            })?;

        if self.config.app.keep_media {
            let dir = self
                .config
                .app
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            match copy_media_out(&dir, &video.title, &media_path, pick.extension) {
                Ok(target) => info!("Kept downloaded media at {}", target.display()),
                Err(err) => warn!("Could not keep the downloaded media: {}", err),
            }
        }

        let remote_url = if self.engine.wants_remote_url() {
            let uploader = OssUploader::new(self.http.clone(), self.config.oss.clone(), self.quiet);
            let media_url = uploader.upload(&media_path).await.map_err(|err| {
                SummaryError::tagged(SummaryStage::Upload, err.code(), err.to_string())
            })?;
            discard_file(&media_path);
            Some(media_url)
        } else {
            debug!("Local transcription needs no upload, leaving the media in place");
            None
        };

        let transcript = self
            .engine
            .transcribe(&media_path, remote_url.as_deref())
            .await
            .map_err(|err| {
                SummaryError::tagged(SummaryStage::Transcribe, err.code(), err.to_string())
            })?;
        if remote_url.is_none() {
            discard_file(&media_path);
        }

        if transcript.is_empty() {
            return Err(SummaryError::tagged(
                SummaryStage::Generate,
                "EMPTY_TRANSCRIPT",
                "transcription produced no usable content",
            ));
        }
        let markdown = note::render_markdown(&video.title, &transcript);
        debug!("Rendered note ({} characters)", markdown.len());

        let organizer = Organizer::new(self.http.clone(), self.config.ai.clone());
        let summary = if organizer.is_configured() {
            let organized = organizer.organize(&markdown).await.map_err(|err| {
                SummaryError::tagged(SummaryStage::AiCall, err.code(), err.to_string())
            })?;
            if organized.is_empty() {
                debug!("Organizer returned nothing usable, keeping the rendered note");
                None
            } else {
                Some(organized)
            }
        } else {
            None
        };

        workspace.discard();

        Ok(SummaryNote {
            title: video.title,
            markdown,
            summary,
        })
    }

    /// Reject a run up front when the selected engine cannot work with the
    /// loaded configuration.
    fn check_engine_config(&self) -> Result<(), SummaryError> {
        let missing = |what: &str| {
            SummaryError::tagged(
                SummaryStage::Validate,
                "MISSING_CONFIG",
                format!(
                    "{} must be configured for the {} engine",
                    what, self.config.app.engine
                ),
            )
        };
        match self.config.app.engine {
            EngineKind::Cloud => {
                if self.config.cloud.api_base.trim().is_empty() {
                    return Err(missing("cloud.api_base"));
                }
                if self.config.oss.bucket.trim().is_empty()
                    || self.config.oss.access_key_id.trim().is_empty()
                    || self.config.oss.access_key_secret.trim().is_empty()
                {
                    return Err(missing("oss.bucket and the OSS access keys"));
                }
            }
            EngineKind::Local => {
                if self.config.whisper.binary.trim().is_empty() {
                    return Err(missing("whisper.binary"));
                }
            }
        }
        Ok(())
    }
}

struct MediaPick {
    url: String,
    extension: &'static str,
    label: &'static str,
    quality_label: String,
}

/// Choose what to download from the resolved options: the first option,
/// preferring its audio track under DASH since transcription only needs
/// the audio.
fn pick_media(video: &ParsedVideo) -> Option<MediaPick> {
    let option = video.streams.first()?;
    let quality_label = option.quality_label.clone();
    match &option.media {
        StreamMedia::Dash {
            video: video_track,
            audio,
        } => {
            if let Some(track) = audio {
                Some(MediaPick {
                    url: track.url.clone(),
                    extension: "m4s",
                    label: "audio track",
                    quality_label,
                })
            } else {
                video_track.as_ref().map(|track| MediaPick {
                    url: track.url.clone(),
                    extension: "m4s",
                    label: "video track",
                    quality_label,
                })
            }
        }
        StreamMedia::Flv { url } => Some(MediaPick {
            url: url.clone(),
            extension: "flv",
            label: "flv stream",
            quality_label,
        }),
        StreamMedia::Mp4 { url } => Some(MediaPick {
            url: url.clone(),
            extension: "mp4",
            label: "mp4 stream",
            quality_label,
        }),
    }
}

/// Best-effort removal of the downloaded artifact once no later stage needs
/// it. The workspace catches anything left behind.
fn discard_file(path: &Path) {
    match fs_err::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(err) => warn!("Could not remove {}: {}", path.display(), err),
    }
}

fn copy_media_out(
    dir: &Path,
    title: &str,
    media_path: &Path,
    extension: &str,
) -> std::io::Result<PathBuf> {
    fs_err::create_dir_all(dir)?;
    let mut stem = sanitize_filename(title);
    if stem.is_empty() {
        stem = "media".to_string();
    }
    let target = dir.join(format!("{}.{}", stem, extension));
    fs_err::copy(media_path, &target)?;
    Ok(target)
}
