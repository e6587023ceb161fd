//! Layered application configuration.
//!
//! Defaults are layered with an optional `novastream.toml` and environment variables
//! prefixed `NOVASTREAM_` (double underscore as the nesting separator), following the
//! same "defaults, then file, then env" shape the upstream config crate is built for.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub hls: HlsSettings,
    pub registry: RegistrySettings,
    pub queue: QueueSettings,
    pub external: ExternalToolSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            hls: HlsSettings::default(),
            registry: RegistrySettings::default(),
            queue: QueueSettings::default(),
            external: ExternalToolSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from built-in defaults, an optional `novastream.toml`, and
    /// `NOVASTREAM_`-prefixed environment variables, in that order of precedence.
    pub fn load() -> crate::error::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Settings::default()).map_err(|e| {
                crate::error::Error::internal(format!("invalid default settings: {e}"))
            })?)
            .add_source(config::File::with_name("novastream").required(false))
            .add_source(
                config::Environment::with_prefix("NOVASTREAM")
                    .separator("__")
                    .try_parsing(true),
            );

        let built = builder
            .build()
            .map_err(|e| crate::error::Error::internal(format!("failed to load config: {e}")))?;

        built
            .try_deserialize()
            .map_err(|e| crate::error::Error::internal(format!("failed to parse config: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9870,
            enable_cors: true,
        }
    }
}

/// HLS session manager tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsSettings {
    /// Base directory under which one arena directory per session is created.
    pub base_dir: String,
    pub segment_duration_secs: u32,
    /// How long a session survives with no access before being reaped.
    pub idle_ttl_secs: u64,
    /// Background reaper tick interval.
    pub reap_interval_secs: u64,
    /// Deadline waiting for the playlist, init segment and first media segment
    /// to appear synchronously inside `createSession`.
    pub first_segment_deadline_secs: u64,
    /// Deadline waiting for any individual file (playlist/segment) to become
    /// ready once a session already exists.
    pub file_ready_deadline_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for HlsSettings {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir()
                .join("novastream-hls")
                .to_string_lossy()
                .into_owned(),
            segment_duration_secs: 4,
            idle_ttl_secs: 30 * 60,
            reap_interval_secs: 60,
            first_segment_deadline_secs: 60,
            file_ready_deadline_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

impl HlsSettings {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn first_segment_deadline(&self) -> Duration {
        Duration::from_secs(self.first_segment_deadline_secs)
    }

    pub fn file_ready_deadline(&self) -> Duration {
        Duration::from_secs(self.file_ready_deadline_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Stream registry thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    pub pause_threshold_secs: u64,
    pub hide_threshold_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            pause_threshold_secs: 30,
            hide_threshold_secs: 5 * 60,
        }
    }
}

impl RegistrySettings {
    pub fn pause_threshold(&self) -> Duration {
        Duration::from_secs(self.pause_threshold_secs)
    }

    pub fn hide_threshold(&self) -> Duration {
        Duration::from_secs(self.hide_threshold_secs)
    }
}

/// Resolve queue tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub worker_count: usize,
    pub status_ttl_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            worker_count: 2,
            status_ttl_secs: 15 * 60,
        }
    }
}

impl QueueSettings {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }
}

/// Paths to the external processes the core invokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalToolSettings {
    pub probe_binary: String,
    pub transcoder_binary: String,
    pub subtitle_extractor_binary: String,
}

impl Default for ExternalToolSettings {
    fn default() -> Self {
        Self {
            probe_binary: "ffprobe".to_string(),
            transcoder_binary: "ffmpeg".to_string(),
            subtitle_extractor_binary: "ffmpeg".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_thresholds() {
        let settings = Settings::default();
        assert_eq!(settings.registry.pause_threshold_secs, 30);
        assert_eq!(settings.registry.hide_threshold_secs, 300);
        assert_eq!(settings.hls.idle_ttl_secs, 1800);
        assert_eq!(settings.hls.reap_interval_secs, 60);
        assert_eq!(settings.queue.status_ttl_secs, 900);
    }
}
