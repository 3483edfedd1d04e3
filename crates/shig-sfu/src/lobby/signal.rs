use super::error::{LobbyError, Result};
use super::hub::Hub;
use super::messenger::{Messenger, SignalObserver};
use crate::rtp::RtpEndpoint;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Server-driven renegotiation of a session.
///
/// Offers for the egress endpoint are numbered; an answer is only applied if
/// it carries the number of the newest offer. The messenger comes from the
/// data channel the publisher opens on its ingress connection.
pub(crate) struct Signal {
    session_id: Uuid,
    offer_number: AtomicU32,
    messenger: OnceLock<Arc<Messenger>>,
    messenger_ready: CancellationToken,
    messenger_timeout: Duration,
    session: CancellationToken,
    ingress: RwLock<Option<Arc<dyn RtpEndpoint>>>,
    egress: RwLock<Option<Arc<dyn RtpEndpoint>>>,
    hub: Hub,
}

impl Signal {
    pub(crate) fn new(
        session_id: Uuid,
        hub: Hub,
        session: CancellationToken,
        messenger_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            offer_number: AtomicU32::new(0),
            messenger: OnceLock::new(),
            messenger_ready: CancellationToken::new(),
            messenger_timeout,
            session,
            ingress: RwLock::new(None),
            egress: RwLock::new(None),
            hub,
        })
    }

    pub(crate) async fn set_messenger(self: &Arc<Self>, messenger: Arc<Messenger>) {
        if self.messenger.set(Arc::clone(&messenger)).is_err() {
            tracing::warn!(session = %self.session_id, "Session already has a messenger");
            return;
        }
        let observer: Arc<dyn SignalObserver> = self.clone();
        messenger.register(Arc::downgrade(&observer)).await;
        self.messenger_ready.cancel();
        tracing::debug!(session = %self.session_id, "Messenger ready");
    }

    pub(crate) fn has_messenger(&self) -> bool {
        self.messenger.get().is_some()
    }

    /// Blocks until the publisher's data channel is usable.
    pub(crate) async fn wait_for_messenger(&self, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = self.messenger_ready.cancelled() => Ok(()),
            _ = self.session.cancelled() => Err(LobbyError::AlreadyClosed),
            _ = cancel.cancelled() => Err(LobbyError::RequestTimeout),
            _ = tokio::time::sleep(self.messenger_timeout) => Err(LobbyError::ReceiverHasNoMessenger),
        }
    }

    pub(crate) async fn set_ingress_endpoint(&self, endpoint: Arc<dyn RtpEndpoint>) {
        *self.ingress.write().await = Some(endpoint);
    }

    pub(crate) async fn add_egress_endpoint(&self, endpoint: Arc<dyn RtpEndpoint>) {
        *self.egress.write().await = Some(endpoint);
        self.offer_number.store(0, Ordering::SeqCst);
    }

    /// Drops the endpoints once the session is done with them.
    pub(crate) async fn release_endpoints(&self) {
        self.ingress.write().await.take();
        self.egress.write().await.take();
    }

    #[cfg(test)]
    pub(crate) async fn has_endpoints(&self) -> bool {
        self.ingress.read().await.is_some() || self.egress.read().await.is_some()
    }

    pub(crate) fn current_offer(&self) -> u32 {
        self.offer_number.load(Ordering::SeqCst)
    }

    fn next_offer(&self) -> u32 {
        self.offer_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Sends a renegotiation offer of the egress endpoint to the client.
    pub(crate) async fn on_negotiation_needed(&self, offer: RTCSessionDescription) {
        let Some(messenger) = self.messenger.get() else {
            tracing::warn!(session = %self.session_id, "Renegotiation without messenger");
            return;
        };
        let number = self.next_offer();
        tracing::debug!(session = %self.session_id, "Sending offer {}", number);
        if let Err(e) = messenger.send_offer(offer.sdp, number).await {
            tracing::warn!(session = %self.session_id, "Sending offer {} failed: {}", number, e);
        }
    }

    /// Applies an answer to the egress endpoint.
    ///
    /// Returns `false` if the answer belongs to an outdated offer and was
    /// discarded.
    pub(crate) async fn on_egress_answer(
        &self,
        answer: RTCSessionDescription,
        number: u32,
    ) -> Result<bool> {
        let current = self.current_offer();
        if number != current {
            tracing::debug!(
                session = %self.session_id,
                "Discarding answer {} (current offer is {})",
                number,
                current
            );
            return Ok(false);
        }
        let egress = self
            .egress
            .read()
            .await
            .clone()
            .ok_or(LobbyError::NoSenderInSession)?;
        egress
            .set_answer(answer)
            .await
            .map_err(|e| LobbyError::ExternalAnswerError(e.to_string()))?;
        egress.set_init_complete();
        Ok(true)
    }

    async fn on_ingress_offer(&self, offer: RTCSessionDescription, number: u32) -> Result<()> {
        let ingress = self
            .ingress
            .read()
            .await
            .clone()
            .ok_or(LobbyError::NoReceiverInSession)?;
        let messenger = self
            .messenger
            .get()
            .ok_or(LobbyError::ReceiverHasNoMessenger)?;
        let answer = ingress.set_new_offer(offer, &self.session).await?;
        messenger.send_answer(answer.sdp, number).await
    }

    pub(crate) async fn send_mute(&self, mid: String, mute: bool) {
        if let Some(messenger) = self.messenger.get() {
            if let Err(e) = messenger.send_mute(mid, mute).await {
                tracing::warn!(session = %self.session_id, "Sending mute failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl SignalObserver for Signal {
    async fn on_offer(&self, number: u32, sdp: String) {
        let result = match RTCSessionDescription::offer(sdp) {
            Ok(offer) => self.on_ingress_offer(offer, number).await,
            Err(e) => Err(LobbyError::InvalidSdp(e.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(session = %self.session_id, "Ingress renegotiation {} failed: {}", number, e);
        }
    }

    async fn on_answer(&self, number: u32, sdp: String) {
        let result = match RTCSessionDescription::answer(sdp) {
            Ok(answer) => self.on_egress_answer(answer, number).await,
            Err(e) => Err(LobbyError::InvalidSdp(e.to_string())),
        };
        if let Err(e) = result {
            tracing::warn!(session = %self.session_id, "Applying answer {} failed: {}", number, e);
        }
    }

    async fn on_mute(&self, mid: String, mute: bool) {
        let Some(ingress) = self.ingress.read().await.clone() else {
            return;
        };
        match ingress.set_ingress_mute(&mid, mute).await {
            Some(info) => self.hub.dispatch_mute(info).await,
            None => tracing::debug!(session = %self.session_id, "No track with mid {}", mid),
        }
    }
}
