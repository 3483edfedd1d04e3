use crate::auth::AuthUser;
use crate::error::Result;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use shig_protocol::{LiveStreamInfo, LobbyStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub async fn start(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
    Json(info): Json<LiveStreamInfo>,
) -> Result<StatusCode> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .manager
        .start_live_stream(&cancel, stream, auth.user_id, info)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn status(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
) -> Result<Json<LobbyStatus>> {
    let status = state.manager.lobby_status(stream).await?;
    Ok(Json(status))
}

pub async fn stop(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((_space, stream)): Path<(String, Uuid)>,
) -> Result<StatusCode> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    state
        .manager
        .stop_live_stream(&cancel, stream, auth.user_id)
        .await?;
    Ok(StatusCode::OK)
}
