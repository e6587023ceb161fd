//! Subtitle extractor (C6): per-track child process converting source subtitles to
//! WebVTT. Same arena/lifecycle discipline as the HLS session manager, simplified to
//! a single output file per session since there is no playlist to serve.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::config::{ExternalToolSettings, HlsSettings};
use crate::domain::SubtitleStreamInfo;
use crate::error::{Error, Result};
use crate::support::process::{LineSink, spawn_process_waiter, spawn_supervised_with_stdout_sink};

const VTT_NAME: &str = "subtitles.vtt";

fn mint_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("sub_{}", hex::encode(bytes))
}

struct SubtitleSession {
    dir: PathBuf,
    track: SubtitleStreamInfo,
    first_cue_time: Mutex<Option<f64>>,
    extraction_complete: AtomicBool,
    cancel: CancellationToken,
}

/// Owns every live subtitle extraction session, keyed by session id.
pub struct SubtitleManager {
    sessions: DashMap<String, Arc<SubtitleSession>>,
    base_dir: PathBuf,
    tools: ExternalToolSettings,
    poll_interval: std::time::Duration,
    file_ready_deadline: std::time::Duration,
}

impl SubtitleManager {
    pub fn new(hls_settings: &HlsSettings, tools: ExternalToolSettings) -> Self {
        Self {
            sessions: DashMap::new(),
            base_dir: Path::new(&hls_settings.base_dir).join("subtitles"),
            tools,
            poll_interval: hls_settings.poll_interval(),
            file_ready_deadline: hls_settings.file_ready_deadline(),
        }
    }

    /// Spawns one extractor child per requested track, keyed by its relative
    /// (0-based, subtitle-only) index. Internally maps back to the track's
    /// absolute probe index when invoking the extractor.
    ///
    /// Each child's stdout is parsed for the first WebVTT cue timing line it
    /// echoes (`"<start> --> <end>"`) and recorded via [`Self::record_first_cue_time`],
    /// which the player reads to correct subtitle clock offset against the
    /// HLS segment start (spec §4.6/§9).
    pub async fn start_pre_extraction(
        self: &Arc<Self>,
        source_url: &str,
        tracks: &[SubtitleStreamInfo],
        start_offset: f64,
    ) -> Result<HashMap<usize, String>> {
        let mut out = HashMap::new();

        for (relative_index, track) in tracks.iter().enumerate() {
            let id = mint_session_id();
            let dir = self.base_dir.join(&id);
            fs::create_dir_all(&dir).await?;

            let cancel = CancellationToken::new();
            let command = build_extractor_command(
                &self.tools.subtitle_extractor_binary,
                source_url,
                track.index,
                start_offset,
                &dir,
            );

            let manager = self.clone();
            let cue_session_id = id.clone();
            let sink: LineSink = Arc::new(move |line: &str| {
                if let Some(seconds) = parse_first_cue_seconds(line) {
                    manager.record_first_cue_time(&cue_session_id, seconds);
                }
            });
            let child = spawn_supervised_with_stdout_sink(command, id.clone(), Some(sink))
                .map_err(|e| Error::internal(format!("failed to spawn subtitle extractor: {e}")))?;

            let session = Arc::new(SubtitleSession {
                dir,
                track: track.clone(),
                first_cue_time: Mutex::new(None),
                extraction_complete: AtomicBool::new(false),
                cancel: cancel.clone(),
            });
            self.sessions.insert(id.clone(), session.clone());

            let exit_rx = spawn_process_waiter(child, cancel);
            tokio::spawn(async move {
                let _ = exit_rx.await;
                session.extraction_complete.store(true, Ordering::Relaxed);
            });

            out.insert(relative_index, id);
        }

        Ok(out)
    }

    /// Returns the growing WebVTT file's bytes once it has content, using the same
    /// readiness policy as HLS segment serving.
    pub async fn serve_vtt(&self, session_id: &str) -> Result<Vec<u8>> {
        let session = self
            .sessions
            .get(session_id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::not_found("subtitle session", session_id))?;

        let path = session.dir.join(VTT_NAME);
        let deadline = Instant::now() + self.file_ready_deadline;
        loop {
            if let Ok(meta) = fs::metadata(&path).await {
                if meta.len() > 0 {
                    return Ok(fs::read(&path).await?);
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout("subtitle VTT file"));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Seconds until the extractor's first emitted cue, used by the player to
    /// correct subtitle clock offset against the HLS segment start.
    pub fn first_cue_time(&self, session_id: &str) -> Result<Option<f64>> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found("subtitle session", session_id))?;
        Ok(*session.first_cue_time.lock())
    }

    /// Records the extractor's first observed cue time. Called by the stderr/stdout
    /// drain task the first time it parses a cue timestamp.
    pub fn record_first_cue_time(&self, session_id: &str, seconds: f64) {
        if let Some(session) = self.sessions.get(session_id) {
            let mut guard = session.first_cue_time.lock();
            if guard.is_none() {
                *guard = Some(seconds);
            }
        }
    }

    pub fn is_complete(&self, session_id: &str) -> Result<bool> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found("subtitle session", session_id))?;
        Ok(session.extraction_complete.load(Ordering::Relaxed))
    }

    /// The source track this session was extracted from.
    pub fn track_metadata(&self, session_id: &str) -> Result<SubtitleStreamInfo> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| Error::not_found("subtitle session", session_id))?;
        Ok(session.track.clone())
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                session.cancel.cancel();
                let _ = fs::remove_dir_all(&session.dir).await;
            }
        }
    }
}

/// Parses the start time (in seconds) from a WebVTT cue timing line such as
/// `"00:00:01.000 --> 00:00:04.000"`, which the extractor echoes to stdout the
/// first time it emits a cue. Any other line (including `WEBVTT`, blank lines,
/// or cue text) returns `None`.
fn parse_first_cue_seconds(line: &str) -> Option<f64> {
    let (start, _) = line.split_once("-->")?;
    parse_vtt_timestamp(start.trim())
}

/// Parses a WebVTT timestamp of the form `HH:MM:SS.mmm` or `MM:SS.mmm` into seconds.
fn parse_vtt_timestamp(ts: &str) -> Option<f64> {
    let mut fields = ts.split(':');
    let first: f64 = fields.next()?.parse().ok()?;
    let second = fields.next()?;
    match fields.next() {
        Some(third) => {
            let minutes = second.parse::<f64>().ok()?;
            let seconds = third.parse::<f64>().ok()?;
            Some(first * 3600.0 + minutes * 60.0 + seconds)
        }
        None => {
            let seconds = second.parse::<f64>().ok()?;
            Some(first * 60.0 + seconds)
        }
    }
}

fn build_extractor_command(
    binary: &str,
    source_url: &str,
    absolute_track_index: i32,
    start_offset: f64,
    dir: &Path,
) -> tokio::process::Command {
    let mut cmd = process_utils::tokio_command(binary);
    if start_offset > 0.0 {
        cmd.args(["-ss", &start_offset.to_string()]);
    }
    cmd.args(["-i", source_url]);
    cmd.args(["-map", &format!("0:{absolute_track_index}")]);
    cmd.args(["-c:s", "webvtt"]);
    cmd.arg(dir.join(VTT_NAME));
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_prefixed_hex_ids() {
        let id = mint_session_id();
        assert!(id.starts_with("sub_"));
        assert_eq!(id.len(), "sub_".len() + 32);
    }

    #[test]
    fn parses_cue_start_with_hours() {
        assert_eq!(
            parse_first_cue_seconds("00:00:01.000 --> 00:00:04.000"),
            Some(1.0)
        );
        assert_eq!(
            parse_first_cue_seconds("01:02:03.500 --> 01:02:05.000"),
            Some(3723.5)
        );
    }

    #[test]
    fn parses_cue_start_without_hours() {
        assert_eq!(parse_first_cue_seconds("02:03.250 --> 02:06.250"), Some(123.25));
    }

    #[test]
    fn non_timing_lines_are_ignored() {
        assert_eq!(parse_first_cue_seconds("WEBVTT"), None);
        assert_eq!(parse_first_cue_seconds(""), None);
        assert_eq!(parse_first_cue_seconds("Hello world"), None);
    }

    #[test]
    fn record_first_cue_time_keeps_the_first_value() {
        let manager = Arc::new(SubtitleManager::new(
            &HlsSettings::default(),
            ExternalToolSettings::default(),
        ));
        let session = Arc::new(SubtitleSession {
            dir: PathBuf::from("/tmp/doesnotmatter"),
            track: SubtitleStreamInfo::default(),
            first_cue_time: Mutex::new(None),
            extraction_complete: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        manager.sessions.insert("s1".to_string(), session);

        manager.record_first_cue_time("s1", 1.5);
        manager.record_first_cue_time("s1", 9.9);

        assert_eq!(manager.first_cue_time("s1").unwrap(), Some(1.5));
    }
}
