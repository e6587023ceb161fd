//! Route composition: mounts each module's router under its own path prefix.

pub(crate) mod admin;
pub(crate) mod playback;
pub(crate) mod video;

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::server::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/playback", playback::router())
        .nest("/video", video::router())
        .nest("/admin", admin::router())
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
