use super::{SDP_CONTENT_TYPE, sdp_body};
use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Publishes the caller's media into the stream's lobby
pub async fn publish(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((space, stream)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let offer = RTCSessionDescription::offer(sdp_body(&headers, body)?)
        .map_err(|e| AppError::BadRequest(format!("invalid offer: {}", e)))?;

    // cancelled when the client goes away
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let joined = state
        .manager
        .access_lobby(&cancel, stream, auth.user_id, offer)
        .await?;
    tracing::debug!(
        space = %space,
        lobby = %stream,
        session = %joined.session_id,
        "Publisher joined"
    );

    let answer = joined.answer.sdp;
    let etag = format!("{:x}", md5::compute(answer.as_bytes()));
    let location = format!("resource/{}", joined.resource);

    let mut response = (StatusCode::CREATED, answer).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(SDP_CONTENT_TYPE));
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(&etag).map_err(|e| AppError::Internal(e.into()))?,
    );
    headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(|e| AppError::Internal(e.into()))?,
    );
    Ok(response)
}

/// Ends the caller's session in the stream's lobby
pub async fn unpublish(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
) -> Result<StatusCode> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .manager
        .leave_lobby(&cancel, stream, auth.user_id)
        .await?;
    Ok(StatusCode::OK)
}
