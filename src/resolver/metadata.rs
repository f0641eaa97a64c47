//! Video metadata: the view endpoint, error-code mapping, part selection.

use reqwest::Client;
use serde::Deserialize;

use super::extract::{VideoId, VideoIdentifier};
use super::{call_api, ParseError, ParseStage};
use crate::config::BilibiliConfig;

/// One entry of a video's part list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PageInfo {
    /// Stream identifier of this part.
    pub cid: i64,
    /// 1-based index of this part.
    pub page: u32,
    #[serde(rename = "part")]
    pub title: String,
    #[serde(default, rename = "duration")]
    pub duration_secs: f64,
}

/// Metadata for one video with a part already selected.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub bvid: String,
    pub aid: u64,
    pub title: String,
    /// Stream identifier of the selected part.
    pub cid: i64,
    /// Duration of the selected part in seconds.
    pub duration_secs: f64,
    pub pages: Vec<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    bvid: String,
    aid: u64,
    title: String,
    #[serde(default)]
    duration: f64,
    #[serde(default)]
    pages: Vec<PageInfo>,
}

/// Fetch video metadata and select the requested part.
pub async fn fetch(
    http: &Client,
    cfg: &BilibiliConfig,
    ident: &VideoIdentifier,
) -> Result<VideoMetadata, ParseError> {
    let query = match &ident.id {
        VideoId::Bvid(bvid) => format!("bvid={}", urlencoding::encode(bvid)),
        VideoId::Avid(aid) => format!("aid={}", aid),
    };
    let url = format!(
        "{}/x/web-interface/view?{}",
        cfg.api_base.trim_end_matches('/'),
        query
    );

    let data: ViewData = call_api(http, cfg, ParseStage::Metadata, &url).await?;
    select_part(data, ident.part)
}

/// 1-based part lookup. Out-of-range indexes are a hard failure even though
/// the metadata fetch itself succeeded.
fn select_part(data: ViewData, part: u32) -> Result<VideoMetadata, ParseError> {
    let page = part
        .checked_sub(1)
        .and_then(|index| data.pages.get(index as usize))
        .ok_or_else(|| {
            ParseError::tagged(
                ParseStage::Metadata,
                "INVALID_PART",
                format!(
                    "Invalid part index: {}. Video has {} part(s).",
                    part,
                    data.pages.len()
                ),
            )
        })?;

    let cid = page.cid;
    let duration_secs = if page.duration_secs > 0.0 {
        page.duration_secs
    } else {
        data.duration
    };

    Ok(VideoMetadata {
        bvid: data.bvid,
        aid: data.aid,
        title: data.title,
        cid,
        duration_secs,
        pages: data.pages,
    })
}
