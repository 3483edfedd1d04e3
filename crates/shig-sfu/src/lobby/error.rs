use crate::rtp::RtpError;
use crate::storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LobbyError {
    #[error("already closed")]
    AlreadyClosed,

    #[error("{0} already exists in session")]
    AlreadyExists(&'static str),

    #[error("request timed out")]
    RequestTimeout,

    #[error("no session for user {0}")]
    SessionNotFound(Uuid),

    #[error("receiver has no messenger")]
    ReceiverHasNoMessenger,

    #[error("no sender in session")]
    NoSenderInSession,

    #[error("no receiver in session")]
    NoReceiverInSession,

    #[error("remote peer failed to answer: {0}")]
    ExternalAnswerError(String),

    #[error("ingress endpoint without track dispatcher")]
    TrackDispatchMissing,

    #[error("lobby stopped")]
    LobbyStopped,

    #[error("lobby not active")]
    LobbyNotActive,

    #[error("invalid sdp: {0}")]
    InvalidSdp(String),

    #[error("signal channel: {0}")]
    Channel(String),

    #[error(transparent)]
    Rtp(RtpError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<RtpError> for LobbyError {
    fn from(e: RtpError) -> Self {
        match e {
            RtpError::TrackDispatchMissing => LobbyError::TrackDispatchMissing,
            RtpError::InvalidSdp(msg) => LobbyError::InvalidSdp(msg),
            RtpError::SessionClosed | RtpError::EndpointClosed => LobbyError::AlreadyClosed,
            other => LobbyError::Rtp(other),
        }
    }
}

impl From<serde_json::Error> for LobbyError {
    fn from(e: serde_json::Error) -> Self {
        LobbyError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LobbyError>;
