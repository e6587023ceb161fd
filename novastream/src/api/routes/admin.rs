//! `/admin/*` routes: operator-facing visibility into tracked streams.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;

use crate::api::server::AppState;
use crate::registry::TrackedStreamSnapshot;

pub fn router() -> Router<AppState> {
    Router::new().route("/streams", get(list_streams))
}

#[utoipa::path(
    get,
    path = "/admin/streams",
    tag = "admin",
    responses(
        (status = 200, description = "Snapshot of currently tracked streams", body = Vec<TrackedStreamSnapshot>),
    ),
)]
pub(crate) async fn list_streams(State(state): State<AppState>) -> Json<Vec<TrackedStreamSnapshot>> {
    Json(state.registry.snapshot())
}
