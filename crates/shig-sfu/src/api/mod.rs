mod live;
mod whep;
mod whip;

use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    Router,
    http::{HeaderMap, header::CONTENT_TYPE},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub(crate) const SDP_CONTENT_TYPE: &str = "application/sdp";

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Publishing
        .route(
            "/space/{space}/stream/{id}/whip",
            axum::routing::post(whip::publish).delete(whip::unpublish),
        )
        // Subscribing
        .route(
            "/space/{space}/stream/{id}/whep",
            axum::routing::post(whep::start_listen).patch(whep::listen),
        )
        // RTMP bridge
        .route(
            "/space/{space}/stream/{id}/live",
            axum::routing::post(live::start)
                .get(live::status)
                .delete(live::stop),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Takes the SDP out of a request body; only `application/sdp` is accepted.
pub(crate) fn sdp_body(headers: &HeaderMap, body: String) -> Result<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(SDP_CONTENT_TYPE) {
        return Err(AppError::BadRequest(format!(
            "expected content type {}",
            SDP_CONTENT_TYPE
        )));
    }
    if body.trim().is_empty() {
        return Err(AppError::BadRequest("empty sdp".to_string()));
    }
    Ok(body)
}
