//! Endpoint callbacks of a session

use super::messenger::Messenger;
use super::signal::Signal;
use crate::rtp::StateEventHandler;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use uuid::Uuid;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Tells the lobby that a session lost its peer
#[derive(Clone)]
pub(crate) struct LostConnection {
    session_id: Uuid,
    lobby: mpsc::UnboundedSender<Uuid>,
}

impl LostConnection {
    pub(crate) fn new(session_id: Uuid, lobby: mpsc::UnboundedSender<Uuid>) -> Self {
        Self { session_id, lobby }
    }

    fn notify(&self) {
        if self.lobby.send(self.session_id).is_err() {
            tracing::debug!(session = %self.session_id, "Lobby gone before connection loss was reported");
        }
    }
}

/// Callbacks of the ingress endpoint: the publisher's data channel becomes
/// the session's messenger.
///
/// The signal owns the endpoints that own these handlers, so handlers only
/// keep a weak reference back to it.
pub(crate) struct ReceiverHandler {
    signal: Weak<Signal>,
    lost: LostConnection,
}

impl ReceiverHandler {
    pub(crate) fn new(signal: &Arc<Signal>, lost: LostConnection) -> Arc<Self> {
        Arc::new(Self {
            signal: Arc::downgrade(signal),
            lost,
        })
    }
}

#[async_trait]
impl StateEventHandler for ReceiverHandler {
    async fn on_connection_lost(&self) {
        tracing::info!(session = %self.lost.session_id, "Ingress connection lost");
        self.lost.notify();
    }

    async fn on_data_channel(&self, channel: Arc<RTCDataChannel>) {
        let messenger = Messenger::attach(Arc::clone(&channel));
        let signal = Weak::clone(&self.signal);
        channel.on_open(Box::new(move || {
            Box::pin(async move {
                if let Some(signal) = signal.upgrade() {
                    signal.set_messenger(messenger).await;
                }
            })
        }));
    }
}

/// Callbacks of the egress endpoint: renegotiation offers go out through the
/// signal.
pub(crate) struct SenderHandler {
    signal: Weak<Signal>,
    lost: LostConnection,
}

impl SenderHandler {
    pub(crate) fn new(signal: &Arc<Signal>, lost: LostConnection) -> Arc<Self> {
        Arc::new(Self {
            signal: Arc::downgrade(signal),
            lost,
        })
    }
}

#[async_trait]
impl StateEventHandler for SenderHandler {
    async fn on_connection_lost(&self) {
        tracing::info!(session = %self.lost.session_id, "Egress connection lost");
        self.lost.notify();
    }

    async fn on_negotiation_needed(&self, offer: RTCSessionDescription) {
        match self.signal.upgrade() {
            Some(signal) => signal.on_negotiation_needed(offer).await,
            None => tracing::debug!(session = %self.lost.session_id, "Negotiation after session end"),
        }
    }
}
