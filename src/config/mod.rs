use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Browser-like user agent sent to the platform API and stream CDNs.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const DEFAULT_REFERER: &str = "https://www.bilibili.com";

const DEFAULT_ORGANIZE_PROMPT: &str = "Reorganize the following video notes into a clear, well-structured Markdown document. Keep all timestamps and image links, merge fragmented sentences, and group related points under headings.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Platform API access
    pub bilibili: BilibiliConfig,

    /// Object storage for uploaded media
    pub oss: OssConfig,

    /// Cloud transcription job API
    pub cloud: CloudConfig,

    /// Local transcription toolchain
    pub whisper: WhisperConfig,

    /// AI organizer endpoint
    pub ai: AiConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BilibiliConfig {
    /// API base URL
    pub api_base: String,

    /// SESSDATA cookie for logged-in quality tiers
    pub sessdata: Option<String>,

    /// User agent sent with every API request
    pub user_agent: String,

    /// Referer sent with every API request
    pub referer: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Extra attempts after a transient failure
    pub retries: u32,

    /// Base retry delay in milliseconds, doubled per attempt
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OssConfig {
    /// Bucket name
    pub bucket: String,

    /// Region identifier, e.g. oss-cn-hangzhou
    pub region: String,

    /// Service host suffix
    pub host: String,

    /// Access credentials
    pub access_key_id: String,
    pub access_key_secret: String,

    /// Optional key prefix for uploaded objects
    pub key_prefix: Option<String>,

    /// Full endpoint override for S3-compatible stores
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Transcription job API base URL
    pub api_base: String,

    /// API credential sent as a bearer token
    pub app_key: String,

    /// Base seconds between status checks
    pub poll_interval_secs: u64,

    /// Overall polling ceiling in seconds
    pub poll_ceiling_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    /// Recognizer executable
    pub binary: String,

    /// Model size or path (tiny, base, small, medium, large-v3, ...)
    pub model: String,

    /// Device override (cuda, cpu)
    pub device: Option<String>,

    /// Language code (e.g. zh, en); omitted means auto-detect
    pub language: Option<String>,

    /// Beam size for decoding
    pub beam_size: u32,

    /// Sampling temperature
    pub temperature: f64,

    /// Configured transcription timeout floor in milliseconds
    pub timeout_ms: u64,

    /// Media toolchain executables
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Chat-completion style endpoint
    pub endpoint: String,

    /// Bearer API key
    pub api_key: String,

    /// Prompt prepended to the generated notes
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Transcription engine selection
    pub engine: EngineKind,

    /// Requested quality rank (qn)
    pub quality: u32,

    /// Requested stream container: dash, mp4 or flv
    pub format: String,

    /// Keep the downloaded media file next to the note
    pub keep_media: bool,

    /// Directory for generated notes; current directory when unset
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Cloud,
    Local,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Cloud => write!(f, "cloud"),
            EngineKind::Local => write!(f, "local"),
        }
    }
}

impl Default for BilibiliConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            sessdata: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            referer: DEFAULT_REFERER.to_string(),
            timeout_secs: 15,
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for OssConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: "oss-cn-hangzhou".to_string(),
            host: "aliyuncs.com".to_string(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            key_prefix: Some("clipnote".to_string()),
            endpoint: None,
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            app_key: String::new(),
            poll_interval_secs: 5,
            poll_ceiling_secs: 1800,
        }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            binary: "whisper".to_string(),
            model: "base".to_string(),
            device: None,
            language: None,
            beam_size: 5,
            temperature: 0.0,
            timeout_ms: 600_000,
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            prompt: DEFAULT_ORGANIZE_PROMPT.to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Local,
            quality: 80,
            format: "dash".to_string(),
            keep_media: false,
            output_dir: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bilibili: BilibiliConfig::default(),
            oss: OssConfig::default(),
            cloud: CloudConfig::default(),
            whisper: WhisperConfig::default(),
            ai: AiConfig::default(),
            app: AppConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when absent
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content =
                fs_err::read_to_string(&config_path).context("Failed to read config file")?;

            let config: Config =
                serde_yaml::from_str(&content).context("Failed to parse config file")?;

            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("No config file at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("clipnote").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bilibili.api_base.is_empty() {
            anyhow::bail!("Platform API base URL must be configured");
        }

        match self.app.format.as_str() {
            "dash" | "mp4" | "flv" => {}
            other => anyhow::bail!(
                "Unsupported stream format: {} (expected dash, mp4 or flv)",
                other
            ),
        }

        if self.app.quality == 0 {
            anyhow::bail!("Quality rank must be positive");
        }

        if self.whisper.beam_size == 0 {
            anyhow::bail!("Whisper beam size must be positive");
        }

        Ok(())
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  API base: {}", self.bilibili.api_base);
        println!("  Login cookie: {}", set_or_unset(self.bilibili.sessdata.as_deref()));
        println!("  Engine: {}", self.app.engine);
        println!("  Quality: {} ({})", self.app.quality, self.app.format);
        println!("  Keep media: {}", self.app.keep_media);
        match self.app.engine {
            EngineKind::Cloud => {
                println!("  Cloud API: {}", self.cloud.api_base);
                println!("  OSS bucket: {}", self.oss.bucket);
                println!(
                    "  OSS credentials: {}",
                    set_or_unset(non_empty(&self.oss.access_key_id))
                );
            }
            EngineKind::Local => {
                println!("  Whisper binary: {}", self.whisper.binary);
                println!("  Whisper model: {}", self.whisper.model);
                if let Some(device) = &self.whisper.device {
                    println!("  Device: {}", device);
                }
            }
        }
        if !self.ai.endpoint.is_empty() {
            println!("  AI organizer: {}", self.ai.endpoint);
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn set_or_unset(value: Option<&str>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "(set)",
        _ => "(unset)",
    }
}
