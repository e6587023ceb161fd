//! Core value types shared across components.
//!
//! These mirror the entities in the data model: candidates and resolutions flowing
//! through the resolver and queue, probe-derived stream metadata consumed by the
//! selector, and the session/registry records owned by C3/C5/C6.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Where a playback candidate's underlying file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Debrid,
    Usenet,
    Direct,
}

/// Input to the resolver: an opaque, caller-supplied candidate for a playable file.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaybackCandidate {
    pub id: String,
    pub title: String,
    pub size: u64,
    pub service: ServiceKind,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Health of a resolved (or resolving) playback candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Cached,
    Healthy,
    Queued,
    Processing,
    Failed,
    NotAvailable,
}

impl HealthStatus {
    /// Terminal statuses are final: the caller stops polling.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HealthStatus::Cached
                | HealthStatus::Healthy
                | HealthStatus::Failed
                | HealthStatus::NotAvailable
        )
    }
}

/// Result of resolving (or attempting to resolve) a candidate into a playable URL.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaybackResolution {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<i64>,
    pub content_url: String,
    pub health_status: HealthStatus,
}

impl PlaybackResolution {
    pub fn cached(content_url: impl Into<String>) -> Self {
        Self {
            queue_id: None,
            content_url: content_url.into(),
            health_status: HealthStatus::Cached,
        }
    }

    pub fn queued(queue_id: i64) -> Self {
        Self {
            queue_id: Some(queue_id),
            content_url: String::new(),
            health_status: HealthStatus::Queued,
        }
    }
}

/// One entry in a `resolveBatch` response: either a resolution or an error
/// string, never both absent (spec §4.7: "individual failures are represented
/// by a per-item error string and a null resolution").
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlaybackResolutionItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<PlaybackResolution>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlaybackResolutionItem {
    pub fn ok(resolution: PlaybackResolution) -> Self {
        Self {
            resolution: Some(resolution),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            resolution: None,
            error: Some(error.into()),
        }
    }
}

/// Video stream metadata emitted by the probe client and consumed by the selector
/// and HLS session manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub index: i32,
    pub codec_name: String,
    pub codec_tag: String,
    pub pixel_format: String,
    pub color_transfer: String,
    pub color_primaries: String,
    pub has_dolby_vision: bool,
    pub dv_profile: Option<String>,
}

/// Audio stream metadata emitted by C1 and consumed by C2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub index: i32,
    pub codec_name: String,
    pub language: String,
    pub title: String,
    pub is_default: bool,
}

/// Subtitle stream metadata emitted by C1 and consumed by C2/C6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleStreamInfo {
    pub index: i32,
    pub codec_name: String,
    pub language: String,
    pub title: String,
    pub is_forced: bool,
    pub is_default: bool,
}

/// Full probe result: container duration plus per-kind stream lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    pub duration_secs: Option<f64>,
    pub video: Vec<VideoStreamInfo>,
    pub audio: Vec<AudioStreamInfo>,
    pub subtitles: Vec<SubtitleStreamInfo>,
}

impl ProbeResult {
    pub fn has_hdr10(&self) -> bool {
        self.video
            .iter()
            .any(|v| v.color_transfer == "smpte2084" && v.color_primaries == "bt2020")
    }

    pub fn has_dolby_vision(&self) -> bool {
        self.video.iter().any(|v| v.has_dolby_vision)
    }

    pub fn dv_profile(&self) -> Option<&str> {
        self.video
            .iter()
            .find(|v| v.has_dolby_vision)
            .and_then(|v| v.dv_profile.as_deref())
    }
}

/// Subtitle rendering mode requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SubtitleMode {
    #[default]
    Off,
    ForcedOnly,
    On,
}

/// Per-item watch state produced by C9, keyed by catalog item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    None,
    Partial,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStateEntry {
    pub state: WatchState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unwatched_count: Option<u32>,
}
