use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::EngineKind;

#[derive(Parser)]
#[command(
    name = "clipnote",
    about = "Turn Bilibili video links into structured Markdown notes",
    version,
    long_about = "A CLI tool that resolves a shared Bilibili link into playable streams, downloads the media, transcribes it with a cloud service or a local Whisper-style recognizer, and renders the transcript as a Markdown note."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve a share link into its playable stream options
    Resolve {
        /// Video share link (bilibili.com page or b23.tv shortlink)
        #[arg(value_name = "URL")]
        url: String,

        /// Quality rank to request (e.g. 80 for 1080P)
        #[arg(long, value_name = "RANK")]
        quality: Option<u32>,

        /// Container format to request (dash, mp4 or flv)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "pretty")]
        output: OutputFormat,
    },

    /// Download, transcribe and render a video into a Markdown note
    Summarize {
        /// Video share link (bilibili.com page or b23.tv shortlink)
        #[arg(value_name = "URL")]
        url: String,

        /// Directory for the note and any kept media (default: current directory)
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Transcription engine, overriding the configured choice
        #[arg(short, long, value_enum)]
        engine: Option<EngineKind>,

        /// Keep the downloaded media next to the note
        #[arg(long)]
        keep_media: bool,

        /// Print the result as JSON instead of writing a note file
        #[arg(long)]
        json: bool,
    },

    /// Show or initialize the configuration file
    Config {
        /// Show the current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that the tools the local engine needs are installed
    Doctor,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    /// Human-readable stream listing
    Pretty,
    /// Wire JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Pretty => write!(f, "pretty"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
