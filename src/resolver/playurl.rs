//! Play-stream descriptors: the playurl endpoint and its request flags.

use bitflags::bitflags;
use reqwest::Client;
use serde::Deserialize;

use super::metadata::VideoMetadata;
use super::{call_api, ParseError, ParseStage};
use crate::config::BilibiliConfig;

bitflags! {
    /// Container flags for the descriptor request (the `fnval` parameter).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFlags: u32 {
        const MP4 = 1;
        const DASH = 16;
        const HDR = 64;
        const FOURK = 128;
    }
}

impl Default for FormatFlags {
    fn default() -> Self {
        FormatFlags::DASH
    }
}

/// Quality and container preferences for one descriptor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    /// Requested quality rank (the `qn` parameter), e.g. 80 for 1080p.
    pub quality: u32,
    pub flags: FormatFlags,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            quality: 80,
            flags: FormatFlags::default(),
        }
    }
}

impl StreamRequest {
    /// Request for a named container format. `fnval = 0` asks for the
    /// legacy FLV stream; unknown names fall back to DASH.
    pub fn for_format(quality: u32, format: &str) -> Self {
        let flags = match format {
            "mp4" => FormatFlags::MP4,
            "flv" => FormatFlags::empty(),
            _ => FormatFlags::DASH,
        };
        Self { quality, flags }
    }
}

/// Raw stream descriptor as returned by the playurl endpoint.
///
/// Entries may be incomplete; filtering happens during synthesis, not here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayInfo {
    #[serde(default)]
    pub quality: u32,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub accept_quality: Vec<u32>,
    #[serde(default)]
    pub accept_description: Vec<String>,
    #[serde(default)]
    pub dash: Option<DashStreams>,
    #[serde(default)]
    pub durl: Option<Vec<DurlEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashStreams {
    #[serde(default)]
    pub video: Vec<DashTrack>,
    #[serde(default)]
    pub audio: Option<Vec<DashTrack>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashTrack {
    /// Quality rank for video tracks, codec rank for audio tracks.
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub bandwidth: Option<u64>,
    #[serde(default)]
    pub codecs: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DurlEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub backup_url: Option<Vec<String>>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "length")]
    pub length_ms: Option<u64>,
}

/// Fetch the stream descriptor for the selected part.
pub async fn fetch(
    http: &Client,
    cfg: &BilibiliConfig,
    meta: &VideoMetadata,
    request: &StreamRequest,
) -> Result<PlayInfo, ParseError> {
    let url = format!(
        "{}/x/player/playurl?bvid={}&cid={}&qn={}&fnval={}&fnver=0&fourk=1",
        cfg.api_base.trim_end_matches('/'),
        urlencoding::encode(&meta.bvid),
        meta.cid,
        request.quality,
        request.flags.bits(),
    );
    call_api(http, cfg, ParseStage::Playurl, &url).await
}
