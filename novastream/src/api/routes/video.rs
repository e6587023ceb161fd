//! `/video/*` routes: direct range proxy (C4), HLS sessions (C5), subtitles (C6).

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::SubtitleMode;
use crate::hls::{CreateSessionRequest, SegmentContent};
use crate::registry::StartRequest;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stream", get(direct_stream))
        .route("/hls/sessions", get(create_hls_session))
        .route("/hls/{session_id}/stream.m3u8", get(hls_playlist))
        .route("/hls/{session_id}/{segment}", get(hls_segment))
        .route("/subtitles/{session_id}/subtitles.vtt", get(subtitle_vtt))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
struct DirectStreamQuery {
    path: String,
    #[serde(default)]
    #[allow(dead_code)]
    transmux: Option<String>,
    #[allow(dead_code)]
    token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/video/stream",
    tag = "video",
    params(DirectStreamQuery),
    responses(
        (status = 200, description = "Full body"),
        (status = 206, description = "Partial content for a Range request"),
        (status = 400, description = "Missing/invalid path"),
        (status = 404, description = "Upstream 404"),
        (status = 502, description = "Upstream 5xx or connection failure"),
    ),
)]
pub(crate) async fn direct_stream(
    State(state): State<AppState>,
    Query(query): Query<DirectStreamQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    crate::proxy::validate_remote_url(&query.path)?;

    let client_range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let start_request = StartRequest {
        path: query.path.clone(),
        method: "GET".to_string(),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        ..Default::default()
    };

    let proxied = crate::proxy::proxy(
        &state.registry,
        &query.path,
        client_range.as_deref(),
        start_request,
    )
    .await?;

    let mut response = Response::builder().status(proxied.status);
    *response.headers_mut().unwrap() = proxied.headers;
    Ok(response.body(proxied.body).unwrap())
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
struct CreateHlsSessionQuery {
    url: String,
    #[serde(default)]
    dv: bool,
    #[serde(default)]
    dv_profile: Option<String>,
    #[serde(default)]
    hdr: bool,
    #[serde(default)]
    start_offset: f64,
    #[serde(default)]
    audio_language: String,
    #[serde(default)]
    subtitle_language: String,
    #[serde(default)]
    subtitle_mode: SubtitleMode,
}

#[utoipa::path(
    get,
    path = "/video/hls/sessions",
    tag = "video",
    params(CreateHlsSessionQuery),
    responses(
        (status = 200, description = "Session created", body = crate::hls::HlsSessionSummary),
        (status = 400, description = "Missing/invalid url"),
        (status = 500, description = "Transcoder spawn or readiness failure"),
    ),
)]
pub(crate) async fn create_hls_session(
    State(state): State<AppState>,
    Query(query): Query<CreateHlsSessionQuery>,
) -> ApiResult<axum::Json<crate::hls::HlsSessionSummary>> {
    crate::proxy::validate_remote_url(&query.url)?;

    let summary = state
        .hls
        .create_session(CreateSessionRequest {
            source_url: query.url,
            has_dv: query.dv,
            dv_profile: query.dv_profile,
            has_hdr: query.hdr,
            start_offset: query.start_offset,
            preferred_audio_language: query.audio_language,
            preferred_subtitle_language: query.subtitle_language,
            subtitle_mode: query.subtitle_mode,
        })
        .await
        .map_err(|e| match e {
            crate::error::Error::Timeout(_) => {
                ApiError::internal("transcoder did not produce a playable stream in time")
            }
            other => other.into(),
        })?;
    Ok(axum::Json(summary))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
struct TokenQuery {
    token: Option<String>,
}

#[utoipa::path(
    get,
    path = "/video/hls/{session_id}/stream.m3u8",
    tag = "video",
    params(
        ("session_id" = String, Path, description = "HLS session id"),
        TokenQuery,
    ),
    responses(
        (status = 200, description = "Media playlist (application/vnd.apple.mpegurl)"),
        (status = 404, description = "Unknown session"),
        (status = 504, description = "Playlist did not appear within the readiness deadline"),
    ),
)]
pub(crate) async fn hls_playlist(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_start_matches("Bearer ").to_string())
    });

    let playlist = state
        .hls
        .serve_playlist(&session_id, token.as_deref())
        .await
        .map_err(|e| match e {
            crate::error::Error::Timeout(_) => ApiError::timeout("playlist not ready"),
            other => other.into(),
        })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        playlist,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/video/hls/{session_id}/{segment}",
    tag = "video",
    params(
        ("session_id" = String, Path, description = "HLS session id"),
        ("segment" = String, Path, description = "init.mp4 or segmentN.m4s"),
    ),
    responses(
        (status = 200, description = "Segment or init file bytes"),
        (status = 400, description = "Segment name contains '..' or '/'"),
        (status = 404, description = "Unknown session or file never became ready"),
    ),
)]
pub(crate) async fn hls_segment(
    State(state): State<AppState>,
    Path((session_id, segment)): Path<(String, String)>,
) -> ApiResult<Response> {
    let SegmentContent::Bytes(bytes, content_type) =
        state.hls.serve_segment(&session_id, &segment).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::ACCEPT_RANGES, "bytes"),
            (header::CACHE_CONTROL, "public, max-age=31536000"),
        ],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/video/subtitles/{session_id}/subtitles.vtt",
    tag = "video",
    params(("session_id" = String, Path, description = "Subtitle extraction session id")),
    responses(
        (status = 200, description = "WebVTT (text/vtt)"),
        (status = 404, description = "Unknown session"),
    ),
)]
pub(crate) async fn subtitle_vtt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    let bytes = state.subtitles.serve_vtt(&session_id).await?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/vtt")], bytes).into_response())
}

