//! Narrow interfaces an endpoint talks back through

use super::track_info::TrackInfo;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Announces tracks an ingress endpoint starts or stops publishing
#[async_trait]
pub trait TrackDispatcher: Send + Sync {
    async fn dispatch_add_track(&self, track: TrackInfo);
    async fn dispatch_remove_track(&self, track: TrackInfo);
}

/// Tracks that already exist when an egress endpoint comes up
#[async_trait]
pub trait TrackSource: Send + Sync {
    async fn current_tracks(&self) -> Vec<TrackInfo>;
}

/// Connection state, negotiation and data channel callbacks of one endpoint
#[async_trait]
pub trait StateEventHandler: Send + Sync {
    /// The peer went away (disconnected, failed or closed)
    async fn on_connection_lost(&self);

    /// A renegotiation offer is ready to be sent to the peer
    async fn on_negotiation_needed(&self, _offer: RTCSessionDescription) {}

    /// The peer opened a data channel, or the endpoint created one
    async fn on_data_channel(&self, _channel: Arc<RTCDataChannel>) {}
}
