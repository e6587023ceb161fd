use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rand::RngCore;
use serde::Serialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::{ExternalToolSettings, HlsSettings};
use crate::domain::{ProbeResult, SubtitleMode};
use crate::error::{Error, Result};
use crate::probe::ProbeClient;
use crate::selector::{is_native_audio_codec, is_native_video_codec, select_audio, select_subtitle};
use crate::subtitles::SubtitleManager;
use crate::support::process::{spawn_process_waiter, spawn_supervised};

const PLAYLIST_NAME: &str = "stream.m3u8";
const INIT_NAME: &str = "init.mp4";
const MIN_PLAYLIST_BYTES: u64 = 50;

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn mint_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("ns_{}", hex::encode(bytes))
}

/// Parameters for starting a new HLS session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub source_url: String,
    pub has_dv: bool,
    pub dv_profile: Option<String>,
    pub has_hdr: bool,
    pub start_offset: f64,
    pub preferred_audio_language: String,
    pub preferred_subtitle_language: String,
    pub subtitle_mode: SubtitleMode,
}

/// One pre-extracted subtitle track, handed back so the client can pick a
/// `/video/subtitles/{session_id}/subtitles.vtt` endpoint to poll.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubtitleTrackSummary {
    pub session_id: String,
    pub language: String,
    pub title: String,
    pub is_forced: bool,
    pub is_default: bool,
}

/// What the HTTP layer needs to hand back to the client after session creation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HlsSessionSummary {
    pub session_id: String,
    pub playlist_url: String,
    pub duration: Option<f64>,
    pub start_offset: f64,
    pub has_dv: bool,
    pub has_hdr: bool,
    pub subtitle_tracks: Vec<SubtitleTrackSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_subtitle_session: Option<String>,
}

/// Either a full file read (segments) or the rewritten playlist text.
pub enum SegmentContent {
    Bytes(Vec<u8>, &'static str),
}

struct HlsSession {
    id: String,
    dir: PathBuf,
    created_at: Instant,
    last_access_ns: AtomicI64,
    segments_created: AtomicU64,
    segment_request_count: AtomicU64,
    bytes_streamed: AtomicU64,
    has_dv: bool,
    dv_profile: Option<String>,
    has_hdr: bool,
    duration: Option<f64>,
    start_offset: f64,
    completed: AtomicBool,
    cancel: CancellationToken,
}

impl HlsSession {
    fn touch(&self) {
        self.last_access_ns.store(now_nanos(), Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = self.last_access_ns.load(Ordering::Relaxed);
        let now = now_nanos();
        Duration::from_nanos((now - last).max(0) as u64)
    }
}

/// Owns every live `HlsSession`; the only component permitted to remove entries.
pub struct HlsManager {
    sessions: DashMap<String, Arc<HlsSession>>,
    settings: HlsSettings,
    tools: ExternalToolSettings,
    probe: ProbeClient,
    subtitles: Arc<SubtitleManager>,
    shutdown: CancellationToken,
}

impl HlsManager {
    pub async fn new(
        settings: HlsSettings,
        tools: ExternalToolSettings,
        subtitles: Arc<SubtitleManager>,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&settings.base_dir).await?;
        purge_dir_contents(Path::new(&settings.base_dir)).await?;

        let probe = ProbeClient::new(tools.probe_binary.clone());
        let manager = Arc::new(Self {
            sessions: DashMap::new(),
            settings,
            tools,
            probe,
            subtitles,
            shutdown: CancellationToken::new(),
        });
        manager.clone().spawn_reaper();
        Ok(manager)
    }

    fn spawn_reaper(self: Arc<Self>) {
        let interval = self.settings.reap_interval();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.reap_idle().await,
                }
            }
        });
    }

    async fn reap_idle(&self) {
        let idle_ttl = self.settings.idle_ttl();
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_for() > idle_ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            info!(session = %id, "reaping idle HLS session");
            self.remove_session(&id).await;
        }
    }

    async fn remove_session(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.cancel.cancel();
            let _ = fs::remove_dir_all(&session.dir).await;
        }
    }

    /// Creates a new HLS session: mints an id, allocates an arena directory, spawns
    /// a supervised transcoder, kicks off subtitle pre-extraction (C6) for the
    /// probed tracks, and waits for the playlist/init/first-segment trio to appear
    /// before returning.
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<HlsSessionSummary> {
        let id = mint_session_id();
        let dir = Path::new(&self.settings.base_dir).join(&id);
        fs::create_dir_all(&dir).await?;

        let probe_result = self.probe.probe(&request.source_url).await;
        let duration = probe_result.duration_secs;
        let selected_audio_index =
            select_audio(&probe_result.audio, &request.preferred_audio_language);

        let cancel = CancellationToken::new();
        let command = build_transcoder_command(
            &self.tools.transcoder_binary,
            &request,
            &probe_result,
            selected_audio_index,
            &dir,
            self.settings.segment_duration_secs,
        );
        let child = spawn_supervised(command, id.clone()).map_err(|e| {
            Error::internal(format!("failed to spawn transcoder: {e}"))
        })?;

        let session = Arc::new(HlsSession {
            id: id.clone(),
            dir: dir.clone(),
            created_at: Instant::now(),
            last_access_ns: AtomicI64::new(now_nanos()),
            segments_created: AtomicU64::new(0),
            segment_request_count: AtomicU64::new(0),
            bytes_streamed: AtomicU64::new(0),
            has_dv: request.has_dv,
            dv_profile: request.dv_profile.clone(),
            has_hdr: request.has_hdr,
            duration,
            start_offset: request.start_offset,
            completed: AtomicBool::new(false),
            cancel: cancel.clone(),
        });
        self.sessions.insert(id.clone(), session.clone());

        let exit_rx = spawn_process_waiter(child, cancel);
        {
            let session = session.clone();
            let dv_profile = request.dv_profile.clone();
            tokio::spawn(async move {
                let _ = exit_rx.await;
                session.completed.store(true, Ordering::Relaxed);
                if session.has_dv {
                    if let Some(profile) = dv_profile.as_deref() {
                        fix_init_segment_on_disk(&session.dir, profile).await;
                    }
                }
            });
        }

        let (subtitle_tracks, default_subtitle_session) = self
            .spawn_subtitle_tracks(&id, &request, &probe_result, selected_audio_index)
            .await;

        self.wait_for_first_segment(&session).await?;

        if session.has_dv {
            if let Some(profile) = request.dv_profile.as_deref() {
                fix_init_segment_on_disk(&session.dir, profile).await;
            }
        }

        Ok(HlsSessionSummary {
            session_id: id.clone(),
            playlist_url: format!("/video/hls/{id}/{PLAYLIST_NAME}"),
            duration,
            start_offset: request.start_offset,
            has_dv: request.has_dv,
            has_hdr: request.has_hdr,
            subtitle_tracks,
            default_subtitle_session,
        })
    }

    /// Spawns subtitle extractors (C6) for every probed subtitle track, skipping
    /// HDR/DV HLS sessions entirely (spec §4.6: the subtitle muxer path isn't
    /// exercised in the same transcode as a tone-mapped/DV-tagged stream). Picks
    /// the default track the same way the client would via C2's selector.
    async fn spawn_subtitle_tracks(
        &self,
        hls_session_id: &str,
        request: &CreateSessionRequest,
        probe_result: &ProbeResult,
        selected_audio_index: i64,
    ) -> (Vec<SubtitleTrackSummary>, Option<String>) {
        if request.has_dv || request.has_hdr || probe_result.subtitles.is_empty() {
            return (Vec::new(), None);
        }

        let selected_audio_language = probe_result
            .audio
            .iter()
            .find(|a| a.index as i64 == selected_audio_index)
            .map(|a| a.language.as_str())
            .unwrap_or("");

        let sessions = match self
            .subtitles
            .start_pre_extraction(
                &request.source_url,
                &probe_result.subtitles,
                request.start_offset,
            )
            .await
        {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(
                    error = %e,
                    session = %hls_session_id,
                    "failed to start subtitle pre-extraction"
                );
                return (Vec::new(), None);
            }
        };

        let selected_track_index = select_subtitle(
            &probe_result.subtitles,
            &request.preferred_subtitle_language,
            request.subtitle_mode,
            selected_audio_language,
        );

        let mut tracks = Vec::new();
        let mut default_session = None;
        for (relative_index, track) in probe_result.subtitles.iter().enumerate() {
            let Some(session_id) = sessions.get(&relative_index) else {
                continue;
            };
            let is_default = track.index as i64 == selected_track_index;
            if is_default {
                default_session = Some(session_id.clone());
            }
            tracks.push(SubtitleTrackSummary {
                session_id: session_id.clone(),
                language: track.language.clone(),
                title: track.title.clone(),
                is_forced: track.is_forced,
                is_default,
            });
        }

        (tracks, default_session)
    }

    async fn wait_for_first_segment(&self, session: &HlsSession) -> Result<()> {
        let deadline = Instant::now() + self.settings.first_segment_deadline();
        let poll = self.settings.poll_interval();

        loop {
            let playlist_ready = file_non_empty(&session.dir.join(PLAYLIST_NAME), MIN_PLAYLIST_BYTES).await;
            let init_ready = file_non_empty(&session.dir.join(INIT_NAME), 1).await;
            let has_segment = first_segment_ready(&session.dir).await;

            if playlist_ready && init_ready && has_segment {
                session.segments_created.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::timeout("first HLS segment"));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Returns the rewritten playlist text, touching the session's last-access time.
    /// Waits up to 30 s for the playlist to exist.
    pub async fn serve_playlist(&self, id: &str, token: Option<&str>) -> Result<String> {
        let session = self
            .sessions
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::not_found("HLS session", id))?;
        session.touch();

        let path = session.dir.join(PLAYLIST_NAME);
        self.wait_for_file(&path, MIN_PLAYLIST_BYTES).await?;

        let raw = fs::read_to_string(&path).await?;
        Ok(rewrite_playlist(&raw, session.has_dv || session.has_hdr, token))
    }

    /// Serves a single segment or the init file: rejects unsafe names, waits up to
    /// 30 s for readiness, and updates the session's counters.
    pub async fn serve_segment(&self, id: &str, name: &str) -> Result<SegmentContent> {
        if name.contains("..") || name.contains('/') {
            return Err(Error::bad_input("invalid segment name"));
        }

        let session = self
            .sessions
            .get(id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::not_found("HLS session", id))?;
        session.touch();

        let path = session.dir.join(name);
        self.wait_for_file(&path, 1).await?;

        let bytes = fs::read(&path).await?;
        session
            .segment_request_count
            .fetch_add(1, Ordering::Relaxed);
        session
            .bytes_streamed
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        let content_type = content_type_for(name);
        Ok(SegmentContent::Bytes(bytes, content_type))
    }

    async fn wait_for_file(&self, path: &Path, min_size: u64) -> Result<()> {
        let deadline = Instant::now() + self.settings.file_ready_deadline();
        let poll = self.settings.poll_interval();

        loop {
            if file_non_empty(path, min_size).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(format!("file {}", path.display())));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stops the reaper, kills every child process, and deletes every arena.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.remove_session(&id).await;
        }
    }
}

async fn purge_dir_contents(dir: &Path) -> Result<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_dir() {
            let _ = fs::remove_dir_all(&path).await;
        } else {
            let _ = fs::remove_file(&path).await;
        }
    }
    Ok(())
}

async fn file_non_empty(path: &Path, min_size: u64) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.len() >= min_size)
        .unwrap_or(false)
}

async fn first_segment_ready(dir: &Path) -> bool {
    let mut entries = match fs::read_dir(dir).await {
        Ok(e) => e,
        Err(_) => return false,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("segment") && (name.ends_with(".m4s") || name.ends_with(".ts")) {
            if let Ok(meta) = entry.metadata().await {
                if meta.len() > 0 {
                    return true;
                }
            }
        }
    }
    false
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".m4s") || name.ends_with(".mp4") {
        "video/mp4"
    } else if name.ends_with(".ts") {
        "video/mp2t"
    } else {
        "application/octet-stream"
    }
}

/// Injects `#EXT-X-VIDEO-RANGE:PQ` after `#EXTM3U` (once) and, when a token is
/// supplied, appends it as a query parameter to every segment/init URI.
fn rewrite_playlist(raw: &str, inject_video_range: bool, token: Option<&str>) -> String {
    let mut lines: Vec<String> = raw.lines().map(|l| l.to_string()).collect();

    if inject_video_range && !raw.contains("#EXT-X-VIDEO-RANGE") {
        if let Some(pos) = lines.iter().position(|l| l == "#EXTM3U") {
            lines.insert(pos + 1, "#EXT-X-VIDEO-RANGE:PQ".to_string());
        }
    }

    if let Some(token) = token {
        for line in lines.iter_mut() {
            if line.starts_with("#EXT-X-MAP") {
                *line = append_token_to_map_line(line, token);
            } else if !line.starts_with('#') && !line.trim().is_empty() {
                *line = append_token(line, token);
            }
        }
    }

    let mut out = lines.join("\n");
    if raw.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn append_token(uri: &str, token: &str) -> String {
    let sep = if uri.contains('?') { "&" } else { "?" };
    format!("{uri}{sep}token={token}")
}

fn append_token_to_map_line(line: &str, token: &str) -> String {
    // #EXT-X-MAP:URI="init.mp4"
    if let Some(start) = line.find("URI=\"") {
        let rest = &line[start + 5..];
        if let Some(end) = rest.find('"') {
            let uri = &rest[..end];
            let new_uri = append_token(uri, token);
            return format!(
                "{}URI=\"{}\"{}",
                &line[..start],
                new_uri,
                &rest[end + 1..]
            );
        }
    }
    line.to_string()
}

/// Builds the transcoder invocation, deciding remux-vs-transcode per stream via
/// C2's native-codec predicates and mapping the audio track C2 selected (falling
/// back to ffmpeg's own default stream when nothing qualified).
fn build_transcoder_command(
    binary: &str,
    request: &CreateSessionRequest,
    probe_result: &ProbeResult,
    selected_audio_index: i64,
    dir: &Path,
    segment_duration_secs: u32,
) -> tokio::process::Command {
    let mut cmd = process_utils::tokio_command(binary);

    if request.start_offset > 0.0 {
        cmd.args(["-ss", &request.start_offset.to_string()]);
    }
    cmd.args(["-i", &request.source_url]);

    cmd.args(["-map", "0:v:0"]);
    if selected_audio_index >= 0 {
        cmd.args(["-map", &format!("0:{selected_audio_index}")]);
    } else {
        cmd.args(["-map", "0:a:0?"]);
    }

    let video_native = probe_result
        .video
        .first()
        .map(|v| is_native_video_codec(&v.codec_name))
        .unwrap_or(true);
    if video_native {
        cmd.args(["-c:v", "copy"]);
    } else {
        cmd.args(["-c:v", "libx264", "-preset", "veryfast"]);
    }

    let audio_native = probe_result
        .audio
        .iter()
        .find(|a| a.index as i64 == selected_audio_index)
        .or_else(|| probe_result.audio.first())
        .map(|a| is_native_audio_codec(&a.codec_name))
        .unwrap_or(true);
    if audio_native {
        cmd.args(["-c:a", "copy"]);
    } else {
        cmd.args(["-c:a", "aac", "-b:a", "192k"]);
    }

    cmd.args(["-f", "hls"]);
    cmd.args(["-hls_time", &segment_duration_secs.to_string()]);
    cmd.args(["-hls_playlist_type", "event"]);
    cmd.args(["-hls_segment_type", "fmp4"]);
    cmd.args(["-hls_flags", "independent_segments+temp_file"]);
    cmd.args(["-hls_fmp4_init_filename", INIT_NAME]);
    cmd.args(["-hls_segment_filename", &dir.join("segment%d.m4s").to_string_lossy()]);

    if request.has_dv {
        let tag = match mp4fix::parse_profile(request.dv_profile.as_deref().unwrap_or("")) {
            Some(5) | Some(7) => "dvhe",
            _ => "dvh1",
        };
        cmd.args(["-strict", "unofficial"]);
        cmd.args(["-tag:v", tag]);
        cmd.args([
            "-bsf:v",
            "hevc_metadata=colour_primaries=9:transfer_characteristics=16:matrix_coefficients=9",
        ]);
    }

    cmd.arg(dir.join(PLAYLIST_NAME));
    cmd
}

async fn fix_init_segment_on_disk(dir: &Path, dv_profile: &str) {
    let path = dir.join(INIT_NAME);
    let Ok(mut data) = fs::read(&path).await else {
        return;
    };
    let report = mp4fix::fix_init_segment(&mut data, dv_profile);
    if report.changed() {
        if let Err(e) = fs::write(&path, &data).await {
            warn!(error = %e, path = %path.display(), "failed to write fixed init segment");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_video_range_once() {
        let raw = "#EXTM3U\n#EXT-X-VERSION:7\nsegment0.m4s\n";
        let rewritten = rewrite_playlist(raw, true, None);
        assert_eq!(rewritten.matches("#EXT-X-VIDEO-RANGE:PQ").count(), 1);
        let twice = rewrite_playlist(&rewritten, true, None);
        assert_eq!(twice.matches("#EXT-X-VIDEO-RANGE:PQ").count(), 1);
    }

    #[test]
    fn appends_token_to_segments_and_map() {
        let raw = "#EXTM3U\n#EXT-X-MAP:URI=\"init.mp4\"\nsegment0.m4s\n";
        let rewritten = rewrite_playlist(raw, false, Some("abc123"));
        assert!(rewritten.contains("init.mp4?token=abc123"));
        assert!(rewritten.contains("segment0.m4s?token=abc123"));
    }

    #[test]
    fn token_roundtrip_strips_back_to_original() {
        let raw = "#EXTM3U\nsegment0.m4s\n";
        let with_token = rewrite_playlist(raw, false, Some("tok"));
        let stripped = with_token.replace("?token=tok", "");
        assert_eq!(stripped, raw);
    }

    #[test]
    fn segment_name_validation() {
        assert_eq!(content_type_for("segment0.m4s"), "video/mp4");
        assert_eq!(content_type_for("stream0.ts"), "video/mp2t");
    }

    #[test]
    fn rewritten_playlist_is_still_valid_hls() {
        let raw = "#EXTM3U\n#EXT-X-VERSION:7\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:4.0,\nsegment0.m4s\n#EXT-X-ENDLIST\n";
        let rewritten = rewrite_playlist(raw, true, Some("tok"));
        let (_, parsed) = m3u8_rs::parse_playlist(rewritten.as_bytes())
            .expect("rewritten playlist should still parse as HLS");
        let m3u8_rs::Playlist::MediaPlaylist(media) = parsed else {
            panic!("expected a media playlist");
        };
        assert_eq!(media.segments.len(), 1);
        assert!(media.segments[0].uri.contains("token=tok"));
    }
}
