use super::dispatcher::{StateEventHandler, TrackDispatcher, TrackSource};
use super::error::{Result, RtpError};
use super::sdp::{ingress_track_sdp_infos, set_egress_track_info};
use super::track_info::{TrackInfo, TrackSdpInfo, TrackSdpInfoRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Ingress,
    Egress,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Ingress => write!(f, "ingress"),
            EndpointKind::Egress => write!(f, "egress"),
        }
    }
}

/// Collaborators wired into an endpoint when it is established
#[derive(Clone, Default)]
pub struct EndpointOptions {
    pub(crate) dispatcher: Option<Arc<dyn TrackDispatcher>>,
    pub(crate) handler: Option<Arc<dyn StateEventHandler>>,
    pub(crate) track_source: Option<Arc<dyn TrackSource>>,
    pub(crate) data_channel: bool,
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn TrackDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn StateEventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn track_source(mut self, source: Arc<dyn TrackSource>) -> Self {
        self.track_source = Some(source);
        self
    }

    /// Let the endpoint open a signaling data channel itself
    pub fn data_channel(mut self) -> Self {
        self.data_channel = true;
        self
    }
}

/// One side of a session's media: a publisher (ingress) or a subscriber
/// (egress) peer connection.
#[async_trait]
pub trait RtpEndpoint: Send + Sync {
    fn kind(&self) -> EndpointKind;

    /// Waits for ICE gathering to finish and returns the local description.
    async fn local_description(&self, cancel: &CancellationToken)
    -> Result<RTCSessionDescription>;

    async fn set_answer(&self, answer: RTCSessionDescription) -> Result<()>;

    /// Marks the initial offer/answer exchange as done. Renegotiation waits
    /// for this.
    fn set_init_complete(&self);

    /// Applies a renegotiation offer from the publisher and returns the answer.
    async fn set_new_offer(
        &self,
        offer: RTCSessionDescription,
        cancel: &CancellationToken,
    ) -> Result<RTCSessionDescription>;

    async fn add_track(&self, track: &TrackInfo) -> Result<()>;

    async fn remove_track(&self, track: &TrackInfo) -> Result<()>;

    async fn has_track(&self, track_id: &str) -> bool;

    async fn set_ingress_mute(&self, mid: &str, mute: bool) -> Option<TrackSdpInfo>;

    async fn set_egress_mute(&self, info_id: Uuid, mute: bool) -> Option<TrackSdpInfo>;

    async fn close(&self);
}

pub struct Endpoint {
    kind: EndpointKind,
    session_id: Uuid,
    pc: Arc<RTCPeerConnection>,
    repo: Arc<TrackSdpInfoRepository>,
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
    handler: Option<Arc<dyn StateEventHandler>>,
    negotiation: Mutex<()>,
    gathered: CancellationToken,
    init_complete: CancellationToken,
    closed: CancellationToken,
    closing: AtomicBool,
    tasks: TaskTracker,
}

impl Endpoint {
    pub(crate) fn new(
        kind: EndpointKind,
        session_id: Uuid,
        pc: Arc<RTCPeerConnection>,
        repo: Arc<TrackSdpInfoRepository>,
        handler: Option<Arc<dyn StateEventHandler>>,
        session: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            session_id,
            pc,
            repo,
            senders: Mutex::new(HashMap::new()),
            handler,
            negotiation: Mutex::new(()),
            gathered: CancellationToken::new(),
            init_complete: CancellationToken::new(),
            closed: session.child_token(),
            closing: AtomicBool::new(false),
            tasks: TaskTracker::new(),
        })
    }

    pub(crate) fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    pub(crate) fn init_complete_token(&self) -> CancellationToken {
        self.init_complete.clone()
    }

    /// Flags the local description as final once `done` fires.
    pub(crate) fn watch_gathering(&self, mut done: mpsc::Receiver<()>) {
        let gathered = self.gathered.clone();
        let closed = self.closed.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = done.recv() => gathered.cancel(),
                _ = closed.cancelled() => {}
            }
        });
    }

    pub(crate) fn watch_connection_state(self: &Arc<Self>) {
        let endpoint = Arc::downgrade(self);
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let endpoint = endpoint.clone();
                Box::pin(async move {
                    if let Some(endpoint) = endpoint.upgrade() {
                        endpoint.on_connection_state(state).await;
                    }
                })
            }));
    }

    async fn on_connection_state(&self, state: RTCIceConnectionState) {
        tracing::debug!(
            session = %self.session_id,
            endpoint = %self.kind,
            "ICE connection state changed: {}",
            state
        );
        let lost = match state {
            RTCIceConnectionState::Failed => {
                tracing::warn!(session = %self.session_id, endpoint = %self.kind, "ICE connection failed");
                true
            }
            RTCIceConnectionState::Disconnected | RTCIceConnectionState::Closed => true,
            _ => false,
        };
        if !lost || self.closed.is_cancelled() {
            return;
        }
        if let Some(handler) = &self.handler {
            handler.on_connection_lost().await;
        }
    }

    /// Registers the negotiation-needed callback of an egress endpoint
    pub(crate) fn watch_negotiation(self: &Arc<Self>) {
        if self.handler.is_none() {
            return;
        }
        let endpoint = Arc::downgrade(self);
        self.pc.on_negotiation_needed(Box::new(move || {
            let endpoint = endpoint.clone();
            Box::pin(async move {
                if let Some(endpoint) = endpoint.upgrade() {
                    let tasks = endpoint.tasks.clone();
                    tasks.spawn(async move { endpoint.renegotiate().await });
                }
            })
        }));
    }

    /// Adds the tracks published before this egress endpoint existed, once
    /// its first offer/answer exchange is through.
    pub(crate) fn add_current_tracks_after_init(self: &Arc<Self>, source: Arc<dyn TrackSource>) {
        let endpoint = Arc::downgrade(self);
        let init_complete = self.init_complete.clone();
        let closed = self.closed.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = init_complete.cancelled() => {}
                _ = closed.cancelled() => return,
            }
            let Some(endpoint) = endpoint.upgrade() else {
                return;
            };
            for track in source.current_tracks().await {
                if let Err(e) = endpoint.add_track(&track).await {
                    tracing::warn!(
                        session = %endpoint.session_id,
                        "Adding current track {} failed: {}",
                        track.track_id(),
                        e
                    );
                }
            }
        });
    }

    async fn renegotiate(&self) {
        let Some(handler) = &self.handler else {
            return;
        };
        tokio::select! {
            _ = self.init_complete.cancelled() => {}
            _ = self.closed.cancelled() => return,
        }
        let _guard = self.negotiation.lock().await;
        match self.create_offer().await {
            Ok(offer) => handler.on_negotiation_needed(offer).await,
            Err(e) => tracing::warn!(session = %self.session_id, "Renegotiation failed: {}", e),
        }
    }

    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        let done = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        self.wait_gathering(done, &self.closed).await?;
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(RtpError::NoLocalDescription)?;
        set_egress_track_info(&local, &self.repo).await
    }

    async fn wait_gathering(
        &self,
        mut done: mpsc::Receiver<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = done.recv() => Ok(()),
            _ = self.closed.cancelled() => Err(RtpError::SessionClosed),
            _ = cancel.cancelled() => Err(RtpError::IceGatheringInterrupted),
        }
    }

    async fn mid_of(&self, sender: &Arc<RTCRtpSender>) -> Option<String> {
        for transceiver in self.pc.get_transceivers().await {
            if Arc::ptr_eq(&transceiver.sender().await, sender) {
                return transceiver.mid().map(|mid| mid.to_string());
            }
        }
        None
    }

    /// Drains RTCP of a sender so interceptors keep working.
    fn read_rtcp(&self, sender: Arc<RTCRtpSender>) {
        let closed = self.closed.clone();
        self.tasks.spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = closed.cancelled() => break,
                    result = sender.read(&mut buf) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub(crate) fn start_stats(self: &Arc<Self>, interval: Duration) {
        let pc = Arc::clone(&self.pc);
        let label = format!("{} {}", self.session_id, self.kind);
        super::stats::spawn_stats_logger(&self.tasks, pc, label, interval, self.closed.clone());
    }
}

#[async_trait]
impl RtpEndpoint for Endpoint {
    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn local_description(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RTCSessionDescription> {
        tokio::select! {
            _ = self.gathered.cancelled() => {}
            _ = self.closed.cancelled() => return Err(RtpError::SessionClosed),
            _ = cancel.cancelled() => return Err(RtpError::IceGatheringInterrupted),
        }
        let local = self
            .pc
            .local_description()
            .await
            .ok_or(RtpError::NoLocalDescription)?;
        match self.kind {
            EndpointKind::Egress => set_egress_track_info(&local, &self.repo).await,
            EndpointKind::Ingress => Ok(local),
        }
    }

    async fn set_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    fn set_init_complete(&self) {
        self.init_complete.cancel();
    }

    async fn set_new_offer(
        &self,
        offer: RTCSessionDescription,
        cancel: &CancellationToken,
    ) -> Result<RTCSessionDescription> {
        let _guard = self.negotiation.lock().await;
        for info in ingress_track_sdp_infos(&offer, self.session_id)? {
            if self
                .repo
                .by_ingress_track_id(&info.ingress_track_id)
                .await
                .is_none()
            {
                self.repo.set(info).await;
            }
        }

        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        let done = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        self.wait_gathering(done, cancel).await?;
        self.pc
            .local_description()
            .await
            .ok_or(RtpError::NoLocalDescription)
    }

    async fn add_track(&self, track: &TrackInfo) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(RtpError::EndpointClosed);
        }
        let track_id = track.track_id().to_string();
        let mut senders = self.senders.lock().await;
        if senders.contains_key(&track_id) {
            return Ok(());
        }

        let local: Arc<dyn TrackLocal + Send + Sync> = track.track.clone();
        let sender = self.pc.add_track(local).await?;

        let mut info = track.sdp.clone();
        info.egress_track_id = track_id.clone();
        if let Some(mid) = self.mid_of(&sender).await {
            info.egress_mid = mid;
        }
        self.repo.set(info).await;

        self.read_rtcp(Arc::clone(&sender));
        senders.insert(track_id, sender);
        tracing::debug!(session = %self.session_id, "Added track {}", track.track_id());
        Ok(())
    }

    async fn remove_track(&self, track: &TrackInfo) -> Result<()> {
        let Some(sender) = self.senders.lock().await.remove(track.track_id()) else {
            return Ok(());
        };
        if let Some(info) = self.repo.by_egress_track_id(track.track_id()).await {
            self.repo.delete(info.id).await;
        }
        self.pc.remove_track(&sender).await?;
        tracing::debug!(session = %self.session_id, "Removed track {}", track.track_id());
        Ok(())
    }

    async fn has_track(&self, track_id: &str) -> bool {
        self.senders.lock().await.contains_key(track_id)
    }

    async fn set_ingress_mute(&self, mid: &str, mute: bool) -> Option<TrackSdpInfo> {
        let info = self.repo.by_ingress_mid(mid).await?;
        self.repo.update(info.id, |i| i.mute = mute).await
    }

    async fn set_egress_mute(&self, info_id: Uuid, mute: bool) -> Option<TrackSdpInfo> {
        self.repo.update(info_id, |i| i.mute = mute).await
    }

    async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        let senders: Vec<_> = self.senders.lock().await.drain().map(|(_, s)| s).collect();
        for sender in senders {
            if let Err(e) = sender.stop().await {
                tracing::warn!(session = %self.session_id, "Stopping sender failed: {}", e);
            }
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!(session = %self.session_id, endpoint = %self.kind, "Closing peer connection failed: {}", e);
        }

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!(session = %self.session_id, endpoint = %self.kind, "Endpoint closed");
    }
}
