use super::config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtpError {
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),

    #[error("invalid RTP configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("ingress endpoint needs a track dispatcher")]
    TrackDispatchMissing,

    #[error("ice gathering was interrupted")]
    IceGatheringInterrupted,

    #[error("session already closed")]
    SessionClosed,

    #[error("endpoint already closed")]
    EndpointClosed,

    #[error("peer connection has no local description")]
    NoLocalDescription,

    #[error("invalid sdp: {0}")]
    InvalidSdp(String),

    #[error("live bridge address {0} did not resolve")]
    UnresolvedLiveHost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RtpError>;
