//! Identifier extraction from a canonical video URL.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::{ParseError, ParseStage};

static BV_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(BV[0-9A-Za-z]{10})(?:/|$)").unwrap());
static AV_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bav([0-9A-Za-z]+)(?:/|$)").unwrap());

/// A stable video identity parsed from a canonical URL path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoId {
    /// Symbolic identifier, e.g. `BV1GJ411x7h7`.
    Bvid(String),
    /// Numeric identifier from the legacy `av` scheme.
    Avid(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoIdentifier {
    pub id: VideoId,
    /// 1-based part index for multi-part videos.
    pub part: u32,
}

/// Parse a canonical URL into a video identifier plus part index.
///
/// The part index comes from the `p` query parameter and falls back to 1
/// when the parameter is absent or not a positive integer.
pub fn identify(url: &Url) -> Result<VideoIdentifier, ParseError> {
    let path = url.path();

    if let Some(caps) = BV_PATTERN.captures(path) {
        return Ok(VideoIdentifier {
            id: VideoId::Bvid(caps[1].to_string()),
            part: part_index(url),
        });
    }

    if let Some(caps) = AV_PATTERN.captures(path) {
        let digits = &caps[1];
        let aid: u64 = digits.parse().map_err(|_| {
            ParseError::tagged(
                ParseStage::Extract,
                "INVALID_FORMAT",
                format!("malformed numeric video ID 'av{}'", digits),
            )
        })?;
        if aid == 0 {
            return Err(ParseError::tagged(
                ParseStage::Extract,
                "INVALID_FORMAT",
                "numeric video ID must be positive",
            ));
        }
        return Ok(VideoIdentifier {
            id: VideoId::Avid(aid),
            part: part_index(url),
        });
    }

    Err(ParseError::tagged(
        ParseStage::Extract,
        "NO_VIDEO_ID",
        format!("no video ID in path '{}'", path),
    ))
}

fn part_index(url: &Url) -> u32 {
    url.query_pairs()
        .find(|(key, _)| key == "p")
        .and_then(|(_, value)| value.parse::<u32>().ok())
        .filter(|&p| p >= 1)
        .unwrap_or(1)
}
