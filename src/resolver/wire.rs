//! Wire format for [`ParseResult`]: plain serialization out, fully
//! validated deserialization in.
//!
//! Deserialization happens in two layers. `serde_json` first establishes
//! that the text is JSON at all; a raw mirror of the wire shape then
//! converts into the checked types, rejecting branch violations, unknown
//! enum values, and incomplete nested shapes. A value that survives
//! [`from_json`] upholds every invariant the checked types promise.

use serde::{Deserialize, Serialize};

use super::streams::{AudioTrack, StreamMedia, StreamOption, VideoTrack};
use super::{ErrorCode, ParseError, ParseResult, ParseStage, ParsedVideo};

/// Wire failures, split by whether the input was JSON at all.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid shape: {0}")]
    Shape(String),
}

fn shape(message: impl Into<String>) -> WireError {
    WireError::Shape(message.into())
}

fn require<T>(value: Option<T>, field: &str) -> Result<T, WireError> {
    value.ok_or_else(|| shape(format!("missing field '{}'", field)))
}

pub fn to_json(result: &ParseResult) -> Result<String, WireError> {
    Ok(serde_json::to_string(&RawResult::from(result))?)
}

pub fn from_json(json: &str) -> Result<ParseResult, WireError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(WireError::Malformed)?;
    let raw: RawResult =
        serde_json::from_value(value).map_err(|err| shape(err.to_string()))?;
    raw.try_into()
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawResult {
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<RawVideo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RawError>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawVideo {
    title: Option<String>,
    video_id: Option<String>,
    numeric_id: Option<u64>,
    stream_id: Option<i64>,
    part: Option<u32>,
    duration_seconds: Option<f64>,
    streams: Option<Vec<RawStream>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawStream {
    quality_rank: Option<u32>,
    quality_label: Option<String>,
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<RawVideoTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<RawAudioTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawVideoTrack {
    url: Option<String>,
    backup_urls: Option<Vec<String>>,
    codec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bandwidth: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawAudioTrack {
    url: Option<String>,
    backup_urls: Option<Vec<String>>,
    codec: Option<String>,
    bandwidth: Option<u64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RawError {
    stage: Option<String>,
    code: Option<RawCode>,
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawCode {
    Number(i64),
    Text(String),
}

impl From<&ParseResult> for RawResult {
    fn from(result: &ParseResult) -> Self {
        match result {
            ParseResult::Success(video) => RawResult {
                success: Some(true),
                data: Some(video.into()),
                error: None,
            },
            ParseResult::Failure(err) => RawResult {
                success: Some(false),
                data: None,
                error: Some(err.into()),
            },
        }
    }
}

impl From<&ParsedVideo> for RawVideo {
    fn from(video: &ParsedVideo) -> Self {
        RawVideo {
            title: Some(video.title.clone()),
            video_id: Some(video.bvid.clone()),
            numeric_id: Some(video.aid),
            stream_id: Some(video.cid),
            part: Some(video.part),
            duration_seconds: Some(video.duration_secs),
            streams: Some(video.streams.iter().map(RawStream::from).collect()),
        }
    }
}

impl From<&StreamOption> for RawStream {
    fn from(option: &StreamOption) -> Self {
        let mut raw = RawStream {
            quality_rank: Some(option.quality_rank),
            quality_label: Some(option.quality_label.clone()),
            format: Some(option.media.format_name().to_string()),
            video: None,
            audio: None,
            url: None,
        };
        match &option.media {
            StreamMedia::Dash { video, audio } => {
                raw.video = video.as_ref().map(|track| RawVideoTrack {
                    url: Some(track.url.clone()),
                    backup_urls: Some(track.backup_urls.clone()),
                    codec: Some(track.codec.clone()),
                    width: Some(track.width),
                    height: Some(track.height),
                    bandwidth: Some(track.bandwidth),
                });
                raw.audio = audio.as_ref().map(|track| RawAudioTrack {
                    url: Some(track.url.clone()),
                    backup_urls: Some(track.backup_urls.clone()),
                    codec: Some(track.codec.clone()),
                    bandwidth: Some(track.bandwidth),
                });
            }
            StreamMedia::Flv { url } | StreamMedia::Mp4 { url } => {
                raw.url = Some(url.clone());
            }
        }
        raw
    }
}

impl From<&ParseError> for RawError {
    fn from(err: &ParseError) -> Self {
        RawError {
            stage: Some(err.stage.as_str().to_string()),
            code: Some(match &err.code {
                ErrorCode::Api(code) => RawCode::Number(*code),
                ErrorCode::Tag(tag) => RawCode::Text(tag.clone()),
            }),
            message: Some(err.message.clone()),
        }
    }
}

impl TryFrom<RawResult> for ParseResult {
    type Error = WireError;

    fn try_from(raw: RawResult) -> Result<Self, WireError> {
        let success = require(raw.success, "success")?;
        match (success, raw.data, raw.error) {
            (true, Some(data), None) => Ok(ParseResult::Success(data.try_into()?)),
            (false, None, Some(error)) => Ok(ParseResult::Failure(error.try_into()?)),
            (_, Some(_), Some(_)) => Err(shape("'data' and 'error' are mutually exclusive")),
            (_, None, None) => Err(shape("one of 'data' or 'error' must be present")),
            (true, None, Some(_)) => Err(shape("'success' is true but only 'error' is present")),
            (false, Some(_), None) => Err(shape("'success' is false but only 'data' is present")),
        }
    }
}

impl TryFrom<RawVideo> for ParsedVideo {
    type Error = WireError;

    fn try_from(raw: RawVideo) -> Result<Self, WireError> {
        let streams = require(raw.streams, "data.streams")?
            .into_iter()
            .enumerate()
            .map(|(index, stream)| stream_option(stream, index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ParsedVideo {
            title: require(raw.title, "data.title")?,
            bvid: require(raw.video_id, "data.videoId")?,
            aid: require(raw.numeric_id, "data.numericId")?,
            cid: require(raw.stream_id, "data.streamId")?,
            part: require(raw.part, "data.part")?,
            duration_secs: require(raw.duration_seconds, "data.durationSeconds")?,
            streams,
        })
    }
}

fn stream_option(raw: RawStream, index: usize) -> Result<StreamOption, WireError> {
    let format = require(raw.format, &format!("streams[{}].format", index))?;

    let media = match format.as_str() {
        "dash" => {
            if raw.url.is_some() {
                return Err(shape(format!(
                    "streams[{}]: dash options must not carry 'url'",
                    index
                )));
            }
            let video = raw
                .video
                .map(|track| video_track(track, index))
                .transpose()?;
            let audio = raw
                .audio
                .map(|track| audio_track(track, index))
                .transpose()?;
            if video.is_none() && audio.is_none() {
                return Err(shape(format!(
                    "streams[{}]: dash options need 'video' or 'audio'",
                    index
                )));
            }
            StreamMedia::Dash { video, audio }
        }
        "flv" | "mp4" => {
            if raw.video.is_some() || raw.audio.is_some() {
                return Err(shape(format!(
                    "streams[{}]: direct options must not carry track objects",
                    index
                )));
            }
            let url = require(raw.url, &format!("streams[{}].url", index))?;
            if format == "flv" {
                StreamMedia::Flv { url }
            } else {
                StreamMedia::Mp4 { url }
            }
        }
        other => {
            return Err(shape(format!(
                "streams[{}]: unknown format '{}'",
                index, other
            )));
        }
    };

    Ok(StreamOption {
        quality_rank: require(raw.quality_rank, &format!("streams[{}].qualityRank", index))?,
        quality_label: require(raw.quality_label, &format!("streams[{}].qualityLabel", index))?,
        media,
    })
}

fn video_track(raw: RawVideoTrack, index: usize) -> Result<VideoTrack, WireError> {
    Ok(VideoTrack {
        url: require(raw.url, &format!("streams[{}].video.url", index))?,
        backup_urls: raw.backup_urls.unwrap_or_default(),
        codec: raw.codec.unwrap_or_default(),
        width: require(raw.width, &format!("streams[{}].video.width", index))?,
        height: require(raw.height, &format!("streams[{}].video.height", index))?,
        bandwidth: require(raw.bandwidth, &format!("streams[{}].video.bandwidth", index))?,
    })
}

fn audio_track(raw: RawAudioTrack, index: usize) -> Result<AudioTrack, WireError> {
    Ok(AudioTrack {
        url: require(raw.url, &format!("streams[{}].audio.url", index))?,
        backup_urls: raw.backup_urls.unwrap_or_default(),
        codec: raw.codec.unwrap_or_default(),
        bandwidth: require(raw.bandwidth, &format!("streams[{}].audio.bandwidth", index))?,
    })
}

impl TryFrom<RawError> for ParseError {
    type Error = WireError;

    fn try_from(raw: RawError) -> Result<Self, WireError> {
        let stage_name = require(raw.stage, "error.stage")?;
        let stage = ParseStage::parse(&stage_name)
            .ok_or_else(|| shape(format!("unknown stage '{}'", stage_name)))?;
        let code = match require(raw.code, "error.code")? {
            RawCode::Number(code) => ErrorCode::Api(code),
            RawCode::Text(tag) => ErrorCode::Tag(tag),
        };
        Ok(ParseError {
            stage,
            code,
            message: require(raw.message, "error.message")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_video() -> ParsedVideo {
        ParsedVideo {
            title: "Test video".to_string(),
            bvid: "BV1GJ411x7h7".to_string(),
            aid: 85440373,
            cid: 146044693,
            part: 2,
            duration_secs: 486.0,
            streams: vec![
                StreamOption {
                    quality_rank: 80,
                    quality_label: "1080P".to_string(),
                    media: StreamMedia::Dash {
                        video: Some(VideoTrack {
                            url: "https://cdn.example/v.m4s".to_string(),
                            backup_urls: vec!["https://backup.example/v.m4s".to_string()],
                            codec: "avc1.640028".to_string(),
                            width: 1920,
                            height: 1080,
                            bandwidth: 2_000_000,
                        }),
                        audio: Some(AudioTrack {
                            url: "https://cdn.example/a.m4s".to_string(),
                            backup_urls: Vec::new(),
                            codec: "mp4a.40.2".to_string(),
                            bandwidth: 192_000,
                        }),
                    },
                },
                StreamOption {
                    quality_rank: 32,
                    quality_label: "480P".to_string(),
                    media: StreamMedia::Mp4 {
                        url: "https://cdn.example/clip.mp4".to_string(),
                    },
                },
            ],
        }
    }

    #[test]
    fn success_round_trips_structurally_equal() {
        let original = ParseResult::Success(sample_video());
        let json = to_json(&original).unwrap();
        let back = from_json(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn failure_round_trips_both_code_shapes() {
        for code in [ErrorCode::Api(-404), ErrorCode::tag("NOT_MATCHING_DOMAIN")] {
            let original = ParseResult::Failure(ParseError {
                stage: ParseStage::Metadata,
                code,
                message: "Video is deleted or does not exist".to_string(),
            });
            let json = to_json(&original).unwrap();
            assert_eq!(from_json(&json).unwrap(), original);
        }
    }

    #[test]
    fn wire_uses_camel_case_and_numeric_codes() {
        let json = to_json(&ParseResult::Success(sample_video())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["success"], serde_json::json!(true));
        assert_eq!(value["data"]["videoId"], serde_json::json!("BV1GJ411x7h7"));
        assert_eq!(value["data"]["numericId"], serde_json::json!(85440373u64));
        assert_eq!(value["data"]["durationSeconds"], serde_json::json!(486.0));
        assert_eq!(value["data"]["streams"][0]["qualityRank"], serde_json::json!(80));
        assert_eq!(value["data"]["streams"][0]["format"], serde_json::json!("dash"));
        // Dash options never serialize a direct URL.
        assert!(value["data"]["streams"][0].get("url").is_none());
        assert!(value.get("error").is_none());

        let failure = ParseResult::Failure(ParseError::api(
            ParseStage::Metadata,
            -404,
            "Video is deleted or does not exist",
        ));
        let value: serde_json::Value =
            serde_json::from_str(&to_json(&failure).unwrap()).unwrap();
        assert_eq!(value["error"]["code"], serde_json::json!(-404));
        assert_eq!(value["error"]["stage"], serde_json::json!("metadata"));
        assert!(value.get("data").is_none());
    }

    #[test]
    fn malformed_text_is_not_a_shape_error() {
        let err = from_json("{not json").unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)), "got: {:?}", err);
    }

    #[test]
    fn shape_violations_are_rejected() {
        let cases: &[(&str, &str)] = &[
            (r#"{"data": {}}"#, "missing success"),
            (r#"{"success": 1, "data": {}}"#, "non-boolean success"),
            (
                r#"{"success": true, "data": {}, "error": {"stage": "metadata", "code": 1, "message": "x"}}"#,
                "both branches populated",
            ),
            (r#"{"success": true}"#, "neither branch populated"),
            (
                r#"{"success": true, "error": {"stage": "metadata", "code": 1, "message": "x"}}"#,
                "success with error branch",
            ),
            (
                r#"{"success": false, "error": {"stage": "download", "code": 1, "message": "x"}}"#,
                "stage outside the enum",
            ),
            (
                r#"{"success": false, "error": {"stage": "metadata", "code": -404.5, "message": "x"}}"#,
                "fractional code",
            ),
            (
                r#"{"success": false, "error": {"stage": "metadata", "code": -404}}"#,
                "missing message",
            ),
        ];

        for (json, what) in cases {
            let err = from_json(json).unwrap_err();
            assert!(matches!(err, WireError::Shape(_)), "{}: {:?}", what, err);
        }
    }

    #[test]
    fn stream_shape_violations_are_rejected() {
        let base = |streams: &str| {
            format!(
                r#"{{"success": true, "data": {{
                    "title": "t", "videoId": "BV1GJ411x7h7", "numericId": 1,
                    "streamId": 2, "part": 1, "durationSeconds": 10.0,
                    "streams": [{}]
                }}}}"#,
                streams
            )
        };

        let cases: &[(&str, &str)] = &[
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "webm", "url": "u"}"#,
                "unknown format",
            ),
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "dash", "url": "u", "video": {"url": "v", "width": 1, "height": 1, "bandwidth": 1}}"#,
                "dash carrying a direct url",
            ),
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "dash"}"#,
                "dash without any track",
            ),
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "mp4", "url": "u", "audio": {"url": "a", "bandwidth": 1}}"#,
                "direct format carrying a track",
            ),
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "mp4"}"#,
                "direct format without url",
            ),
            (
                r#"{"qualityRank": 80, "qualityLabel": "1080P", "format": "dash", "video": {"url": "v", "width": 1, "height": 1}}"#,
                "video track missing bandwidth",
            ),
            (
                r#"{"qualityLabel": "1080P", "format": "mp4", "url": "u"}"#,
                "missing quality rank",
            ),
        ];

        for (stream, what) in cases {
            let err = from_json(&base(stream)).unwrap_err();
            assert!(matches!(err, WireError::Shape(_)), "{}: {:?}", what, err);
        }
    }
}
