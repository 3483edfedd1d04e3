use crate::lobby::LobbyError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Lobby error: {0}")]
    Lobby(LobbyError),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<LobbyError> for AppError {
    fn from(e: LobbyError) -> Self {
        match e {
            LobbyError::AlreadyExists(_) => AppError::Conflict(e.to_string()),
            LobbyError::SessionNotFound(_) | LobbyError::LobbyNotActive => {
                AppError::NotFound(e.to_string())
            }
            LobbyError::InvalidSdp(_) => AppError::BadRequest(e.to_string()),
            other => AppError::Lobby(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Lobby(e) => {
                tracing::error!("Lobby error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status(e: LobbyError) -> StatusCode {
        AppError::from(e).into_response().status()
    }

    #[test]
    fn lobby_errors_map_to_status_codes() {
        assert_eq!(status(LobbyError::AlreadyExists("sender")), StatusCode::CONFLICT);
        assert_eq!(status(LobbyError::LobbyNotActive), StatusCode::NOT_FOUND);
        assert_eq!(
            status(LobbyError::SessionNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(LobbyError::InvalidSdp("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(LobbyError::RequestTimeout),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
