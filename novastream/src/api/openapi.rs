//! OpenAPI documentation configuration.
//!
//! Configures OpenAPI 3.0 specification generation using `utoipa` and serves
//! Swagger UI for interactive exploration of the streaming engine's HTTP surface.

use utoipa::OpenApi;

use crate::api::error::ApiErrorResponse;
use crate::api::routes::playback::{
    EpisodeRef, ResolveBatchRequest, ResolveBatchResponse, ResolveRequest,
};
use crate::domain::{
    HealthStatus, PlaybackCandidate, PlaybackResolution, PlaybackResolutionItem, ServiceKind,
};
use crate::hls::{HlsSessionSummary, SubtitleTrackSummary};
use crate::registry::TrackedStreamSnapshot;

/// OpenAPI documentation for NovaStream's streaming engine core HTTP surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "NovaStream Streaming Engine API",
        version = "0.1.0",
        description = "Playback resolution, direct range proxying, HLS/fMP4 session management, and subtitle pre-extraction.",
        license(name = "MIT OR Apache-2.0"),
    ),
    tags(
        (name = "playback", description = "Resolve catalog candidates into playable URLs"),
        (name = "video", description = "Direct range proxy and HLS/fMP4 session serving"),
        (name = "admin", description = "Operator visibility into tracked streams"),
    ),
    paths(
        crate::api::routes::playback::resolve,
        crate::api::routes::playback::resolve_batch,
        crate::api::routes::playback::queue_status,
        crate::api::routes::video::direct_stream,
        crate::api::routes::video::create_hls_session,
        crate::api::routes::video::hls_playlist,
        crate::api::routes::video::hls_segment,
        crate::api::routes::video::subtitle_vtt,
        crate::api::routes::admin::list_streams,
    ),
    components(schemas(
        ServiceKind,
        PlaybackCandidate,
        HealthStatus,
        PlaybackResolution,
        PlaybackResolutionItem,
        ResolveRequest,
        EpisodeRef,
        ResolveBatchRequest,
        ResolveBatchResponse,
        HlsSessionSummary,
        SubtitleTrackSummary,
        TrackedStreamSnapshot,
        ApiErrorResponse,
    ))
)]
pub struct ApiDoc;
