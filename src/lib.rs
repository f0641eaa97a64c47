//! Clipnote - A Rust CLI tool that turns Bilibili video links into Markdown notes
//!
//! This library resolves a shared video link into playable streams, downloads the
//! media, transcribes it with a cloud service or a local recognizer, and renders
//! the transcript as a structured Markdown document.

pub mod cli;
pub mod config;
pub mod note;
pub mod pipeline;
pub mod resolver;
pub mod transcribe;
pub mod transfer;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use pipeline::{NotePipeline, SummaryError, SummaryNote, SummaryResult, SummaryStage};
pub use resolver::{ErrorCode, ParseError, ParseResult, ParseStage, ParsedVideo, Resolver};
pub use transcribe::{SpeechEngine, Transcript, TranscriptSegment};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
