//! `/playback/*` routes: resolve, resolve-batch, queue status.

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::{PlaybackCandidate, PlaybackResolution, PlaybackResolutionItem};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/resolve", post(resolve))
        .route("/resolve-batch", post(resolve_batch))
        .route("/queue/{queue_id}", get(queue_status))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ResolveRequest {
    result: PlaybackCandidate,
}

#[utoipa::path(
    post,
    path = "/playback/resolve",
    tag = "playback",
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Resolution (cached or queued)", body = PlaybackResolution),
        (status = 400, description = "Malformed body"),
        (status = 502, description = "Upstream resolution failed"),
    ),
)]
pub(crate) async fn resolve(
    State(state): State<AppState>,
    Json(body): Json<ResolveRequest>,
) -> ApiResult<Json<PlaybackResolution>> {
    let resolution = state.resolver.resolve(body.result).await?;
    Ok(Json(resolution))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EpisodeRef {
    #[allow(dead_code)]
    season: u32,
    #[allow(dead_code)]
    episode: u32,
    #[allow(dead_code)]
    code: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ResolveBatchRequest {
    result: PlaybackCandidate,
    episodes: Vec<EpisodeRef>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ResolveBatchResponse {
    results: Vec<PlaybackResolutionItem>,
}

#[utoipa::path(
    post,
    path = "/playback/resolve-batch",
    tag = "playback",
    request_body = ResolveBatchRequest,
    responses(
        (status = 200, description = "One resolution per requested episode, in order", body = ResolveBatchResponse),
        (status = 400, description = "Empty or oversized episode list (max 100)"),
    ),
)]
pub(crate) async fn resolve_batch(
    State(state): State<AppState>,
    Json(body): Json<ResolveBatchRequest>,
) -> ApiResult<Json<ResolveBatchResponse>> {
    if body.episodes.is_empty() {
        return Err(ApiError::bad_request("episodes must not be empty"));
    }

    let candidates: Vec<PlaybackCandidate> = body
        .episodes
        .iter()
        .map(|_| body.result.clone())
        .collect();

    let results = state.resolver.resolve_batch(candidates).await?;
    Ok(Json(ResolveBatchResponse { results }))
}

#[utoipa::path(
    get,
    path = "/playback/queue/{queue_id}",
    tag = "playback",
    params(("queue_id" = i64, Path, description = "Queue item id returned by /playback/resolve")),
    responses(
        (status = 200, description = "Current resolution state", body = PlaybackResolution),
        (status = 400, description = "Invalid id"),
        (status = 404, description = "Unknown queue item"),
        (status = 502, description = "Item terminated as failed or not_available"),
    ),
)]
pub(crate) async fn queue_status(
    State(state): State<AppState>,
    Path(queue_id): Path<i64>,
) -> ApiResult<Json<PlaybackResolution>> {
    let resolution = state.resolver.queue_status(queue_id)?;
    Ok(Json(resolution))
}
