use super::{SDP_CONTENT_TYPE, sdp_body};
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Opens the egress connection; responds with the server's offer.
pub async fn start_listen(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let started = state
        .manager
        .start_listen_lobby(&cancel, stream, auth.user_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, SDP_CONTENT_TYPE)],
        started.offer.sdp,
    ))
}

/// Completes the egress connection with the client's answer.
pub async fn listen(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode> {
    let answer = RTCSessionDescription::answer(sdp_body(&headers, body)?)
        .map_err(|e| AppError::BadRequest(format!("invalid answer: {}", e)))?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .manager
        .listen_lobby(&cancel, stream, auth.user_id, answer)
        .await?;
    Ok(StatusCode::CREATED)
}
