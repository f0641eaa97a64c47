//! Stream synthesis: raw play descriptors into a uniform option model.

use super::playurl::{DashTrack, PlayInfo};
use super::{ParseError, ParseStage};

/// A complete video rendition inside a split-container option.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    pub url: String,
    pub backup_urls: Vec<String>,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub bandwidth: u64,
}

/// An audio rendition inside a split-container option.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub url: String,
    pub backup_urls: Vec<String>,
    pub codec: String,
    pub bandwidth: u64,
}

/// Media payload of one stream option. Split containers carry separate
/// tracks; direct options carry a single muxed URL. The shape itself rules
/// out a direct URL on a DASH option and vice versa.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMedia {
    Dash {
        video: Option<VideoTrack>,
        audio: Option<AudioTrack>,
    },
    Flv {
        url: String,
    },
    Mp4 {
        url: String,
    },
}

impl StreamMedia {
    pub fn format_name(&self) -> &'static str {
        match self {
            StreamMedia::Dash { .. } => "dash",
            StreamMedia::Flv { .. } => "flv",
            StreamMedia::Mp4 { .. } => "mp4",
        }
    }
}

/// One playable choice at a specific quality tier.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOption {
    pub quality_rank: u32,
    pub quality_label: String,
    pub media: StreamMedia,
}

/// Build the uniform option list from a raw descriptor.
///
/// DASH descriptors yield one option per entitled quality tier, pairing the
/// highest-bandwidth valid video entry of that tier with the overall best
/// audio entry. Direct descriptors yield one option per `durl` entry.
/// Incomplete entries (missing URL or required numeric fields) are excluded
/// instead of defaulting to zero.
pub fn synthesize(info: &PlayInfo) -> Result<Vec<StreamOption>, ParseError> {
    let mut options = Vec::new();

    if let Some(dash) = &info.dash {
        let best_audio = dash
            .audio
            .iter()
            .flatten()
            .filter_map(audio_track)
            .max_by_key(|track| track.bandwidth);

        for (rank, label) in quality_tiers(info) {
            let best_video = dash
                .video
                .iter()
                .filter(|track| track.id == Some(rank))
                .filter_map(video_track)
                .max_by_key(|track| track.bandwidth);

            if best_video.is_none() {
                continue;
            }
            options.push(StreamOption {
                quality_rank: rank,
                quality_label: label,
                media: StreamMedia::Dash {
                    video: best_video,
                    audio: best_audio.clone(),
                },
            });
        }

        // Audio-only renditions have no video tier to hang off; still expose them.
        if options.is_empty() {
            if let Some(audio) = best_audio {
                options.push(StreamOption {
                    quality_rank: info.quality,
                    quality_label: tier_label(info, info.quality),
                    media: StreamMedia::Dash {
                        video: None,
                        audio: Some(audio),
                    },
                });
            }
        }
    } else if let Some(durl) = &info.durl {
        let label = tier_label(info, info.quality);
        let is_mp4 = info.format.contains("mp4");

        for entry in durl {
            let url = match entry.url.as_deref().filter(|u| !u.is_empty()) {
                Some(url) => url.to_string(),
                None => continue,
            };
            let media = if is_mp4 {
                StreamMedia::Mp4 { url }
            } else {
                StreamMedia::Flv { url }
            };
            options.push(StreamOption {
                quality_rank: info.quality,
                quality_label: label.clone(),
                media,
            });
        }
    }

    if options.is_empty() {
        return Err(ParseError::tagged(
            ParseStage::Synthesize,
            "NO_STREAMS",
            "descriptor contained no playable streams",
        ));
    }
    Ok(options)
}

fn quality_tiers(info: &PlayInfo) -> Vec<(u32, String)> {
    info.accept_quality
        .iter()
        .enumerate()
        .map(|(index, &rank)| {
            let label = info
                .accept_description
                .get(index)
                .filter(|label| !label.is_empty())
                .cloned()
                .unwrap_or_else(|| format!("quality {}", rank));
            (rank, label)
        })
        .collect()
}

fn tier_label(info: &PlayInfo, rank: u32) -> String {
    quality_tiers(info)
        .into_iter()
        .find(|(tier, _)| *tier == rank)
        .map(|(_, label)| label)
        .unwrap_or_else(|| format!("quality {}", rank))
}

fn video_track(raw: &DashTrack) -> Option<VideoTrack> {
    let url = raw.base_url.as_deref().filter(|u| !u.is_empty())?;
    let bandwidth = raw.bandwidth.filter(|&b| b > 0)?;
    let width = raw.width.filter(|&w| w > 0)?;
    let height = raw.height.filter(|&h| h > 0)?;
    Some(VideoTrack {
        url: url.to_string(),
        backup_urls: raw.backup_url.clone().unwrap_or_default(),
        codec: raw.codecs.clone().unwrap_or_default(),
        width,
        height,
        bandwidth,
    })
}

fn audio_track(raw: &DashTrack) -> Option<AudioTrack> {
    let url = raw.base_url.as_deref().filter(|u| !u.is_empty())?;
    let bandwidth = raw.bandwidth.filter(|&b| b > 0)?;
    Some(AudioTrack {
        url: url.to_string(),
        backup_urls: raw.backup_url.clone().unwrap_or_default(),
        codec: raw.codecs.clone().unwrap_or_default(),
        bandwidth,
    })
}
