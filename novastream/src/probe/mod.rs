//! Probe client (C1): invokes the external media prober and parses its JSON output.
//!
//! Mirrors the supervised-child-process idiom used for the transcoder (`crate::hls`):
//! spawn, collect stdout to completion, and treat a non-zero exit or malformed JSON as
//! non-fatal to the caller — HLS session creation proceeds without duration/HDR/DV hints.

use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::domain::{AudioStreamInfo, ProbeResult, SubtitleStreamInfo, VideoStreamInfo};
use crate::error::{Error, Result};

/// Raw JSON shape the external prober emits.
#[derive(Debug, Deserialize)]
struct RawProbe {
    format: Option<RawFormat>,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDisposition {
    #[serde(default)]
    forced: i32,
    #[serde(default)]
    default: i32,
}

#[derive(Debug, Deserialize, Default)]
struct RawTags {
    language: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSideData {
    side_data_type: Option<String>,
    dv_profile: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    index: i32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    #[serde(default)]
    codec_tag_string: String,
    #[serde(default)]
    tags: RawTags,
    #[serde(default)]
    disposition: RawDisposition,
    color_transfer: Option<String>,
    color_primaries: Option<String>,
    #[serde(default)]
    side_data_list: Vec<RawSideData>,
}

impl RawStream {
    fn is_dolby_vision(&self) -> Option<String> {
        self.side_data_list.iter().find_map(|sd| {
            let ty = sd.side_data_type.as_deref()?.to_ascii_lowercase();
            if ty.contains("dovi") || ty.contains("dolby vision") {
                let profile = sd
                    .dv_profile
                    .as_ref()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default();
                Some(format!("dvhe.{profile:0>2}"))
            } else {
                None
            }
        })
    }
}

/// Client for the external probe binary (e.g. ffprobe).
#[derive(Debug, Clone)]
pub struct ProbeClient {
    binary: String,
}

impl ProbeClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Probe `url`, returning parsed stream metadata.
    ///
    /// Probe failure is non-fatal to the caller: on spawn failure, non-zero exit,
    /// or unparseable JSON, an empty `ProbeResult` is returned instead of
    /// propagating an error, so HLS session creation can proceed without hints.
    pub async fn probe(&self, url: &str) -> ProbeResult {
        match self.probe_inner(url).await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, url, "probe failed, proceeding without metadata");
                ProbeResult::default()
            }
        }
    }

    async fn probe_inner(&self, url: &str) -> Result<ProbeResult> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
                url,
            ])
            .output()
            .await
            .map_err(|e| Error::upstream_failed(format!("probe spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(Error::upstream_failed(format!(
                "probe exited with {:?}",
                output.status.code()
            )));
        }

        let raw: RawProbe = serde_json::from_slice(&output.stdout)?;
        Ok(convert(raw))
    }
}

fn convert(raw: RawProbe) -> ProbeResult {
    let duration_secs = raw
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok());

    let mut result = ProbeResult {
        duration_secs,
        ..Default::default()
    };

    for stream in raw.streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                let dv_profile = stream.is_dolby_vision();
                result.video.push(VideoStreamInfo {
                    index: stream.index,
                    codec_name: stream.codec_name.unwrap_or_default(),
                    codec_tag: stream.codec_tag_string,
                    pixel_format: String::new(),
                    color_transfer: stream.color_transfer.unwrap_or_default(),
                    color_primaries: stream.color_primaries.unwrap_or_default(),
                    has_dolby_vision: dv_profile.is_some(),
                    dv_profile,
                });
            }
            Some("audio") => result.audio.push(AudioStreamInfo {
                index: stream.index,
                codec_name: stream.codec_name.unwrap_or_default(),
                language: stream.tags.language.unwrap_or_default(),
                title: stream.tags.title.unwrap_or_default(),
                is_default: stream.disposition.default != 0,
            }),
            Some("subtitle") => result.subtitles.push(SubtitleStreamInfo {
                index: stream.index,
                codec_name: stream.codec_name.unwrap_or_default(),
                language: stream.tags.language.unwrap_or_default(),
                title: stream.tags.title.unwrap_or_default(),
                is_forced: stream.disposition.forced != 0,
                is_default: stream.disposition.default != 0,
            }),
            _ => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_stream(codec_type: &str, index: i32) -> RawStream {
        RawStream {
            index,
            codec_type: Some(codec_type.to_string()),
            codec_name: Some("h264".to_string()),
            codec_tag_string: String::new(),
            tags: RawTags::default(),
            disposition: RawDisposition::default(),
            color_transfer: None,
            color_primaries: None,
            side_data_list: Vec::new(),
        }
    }

    #[test]
    fn hdr10_detection_requires_both_transfer_and_primaries() {
        let mut video = raw_stream("video", 0);
        video.color_transfer = Some("smpte2084".to_string());
        video.color_primaries = Some("bt2020".to_string());
        let result = convert(RawProbe {
            format: None,
            streams: vec![video],
        });
        assert!(result.has_hdr10());
    }

    #[test]
    fn no_hdr10_when_primaries_mismatch() {
        let mut video = raw_stream("video", 0);
        video.color_transfer = Some("smpte2084".to_string());
        video.color_primaries = Some("bt709".to_string());
        let result = convert(RawProbe {
            format: None,
            streams: vec![video],
        });
        assert!(!result.has_hdr10());
    }

    #[test]
    fn dolby_vision_side_data_sets_profile() {
        let mut video = raw_stream("video", 0);
        video.side_data_list = vec![RawSideData {
            side_data_type: Some("DOVI configuration record".to_string()),
            dv_profile: Some(serde_json::json!(8)),
        }];
        let result = convert(RawProbe {
            format: None,
            streams: vec![video],
        });
        assert!(result.has_dolby_vision());
        assert_eq!(result.dv_profile(), Some("dvhe.08"));
    }

    #[test]
    fn streams_are_bucketed_by_codec_type() {
        let result = convert(RawProbe {
            format: Some(RawFormat {
                duration: Some("123.45".to_string()),
            }),
            streams: vec![raw_stream("video", 0), raw_stream("audio", 1), raw_stream("subtitle", 2)],
        });
        assert_eq!(result.duration_secs, Some(123.45));
        assert_eq!(result.video.len(), 1);
        assert_eq!(result.audio.len(), 1);
        assert_eq!(result.subtitles.len(), 1);
    }
}
