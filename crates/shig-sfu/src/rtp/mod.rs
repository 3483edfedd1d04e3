//! RTP endpoints and the engine that builds them
//!
//! An endpoint wraps one WebRTC peer connection. Ingress endpoints receive a
//! publisher's media and hand every track to a dispatcher; egress endpoints
//! send tracks to a subscriber and renegotiate whenever the track set changes.

mod config;
mod dispatcher;
mod endpoint;
mod engine;
mod error;
mod live;
mod receiver;
mod sdp;
mod stats;
mod track_info;
mod writer;

pub use config::{ConfigError, IceServer, RtpConfig};
pub use dispatcher::{StateEventHandler, TrackDispatcher, TrackSource};
pub use endpoint::{Endpoint, EndpointKind, EndpointOptions, RtpEndpoint};
pub use engine::{Engine, RtpEngine};
pub use error::{Result, RtpError};
pub use live::{LiveForwardConfig, LiveStreamSender, UdpLiveForwarder};
pub use sdp::{ingress_track_sdp_infos, mark_stream_as_main};
pub use track_info::{TrackInfo, TrackSdpInfo, TrackSdpInfoRepository};

#[cfg(test)]
pub(crate) use sdp::tests as sdp_fixtures;
