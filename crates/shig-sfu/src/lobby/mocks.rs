//! Test doubles for the lobby actors

use super::error::Result as LobbyResult;
use super::hub::{Hub, TrackEvent};
use super::messenger::SignalTransport;
use super::session::SessionHandle;
use super::session_repository::SessionRepository;
use crate::rtp::sdp_fixtures::PUBLISHER_OFFER;
use crate::rtp::{
    EndpointKind, EndpointOptions, LiveStreamSender, Result, RtpEndpoint, RtpEngine, RtpError,
    StateEventHandler, TrackDispatcher, TrackInfo, TrackSdpInfo, ingress_track_sdp_infos,
};
use async_trait::async_trait;
use bytes::Bytes;
use shig_protocol::{ChannelMessage, LiveStreamInfo, Purpose};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

#[derive(Default)]
pub(crate) struct MockTransport {
    sent: Mutex<Vec<ChannelMessage>>,
}

impl MockTransport {
    pub(crate) async fn messages(&self) -> Vec<ChannelMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SignalTransport for MockTransport {
    async fn send(&self, data: Bytes) -> LobbyResult<()> {
        let msg = ChannelMessage::from_slice(&data)?;
        self.sent.lock().await.push(msg);
        Ok(())
    }

    fn label(&self) -> String {
        "mock".to_string()
    }
}

/// Endpoint that never touches the network
pub(crate) struct MockEndpoint {
    kind: EndpointKind,
    gathers: bool,
    answers: AtomicUsize,
    init_complete: AtomicBool,
    closed: AtomicBool,
    tracks: Mutex<HashSet<String>>,
    infos: Mutex<Vec<TrackSdpInfo>>,
}

impl MockEndpoint {
    fn build(kind: EndpointKind, gathers: bool) -> Self {
        Self {
            kind,
            gathers,
            answers: AtomicUsize::new(0),
            init_complete: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tracks: Mutex::new(HashSet::new()),
            infos: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ingress() -> Self {
        Self::build(EndpointKind::Ingress, true)
    }

    pub(crate) fn egress() -> Self {
        Self::build(EndpointKind::Egress, true)
    }

    /// An ingress endpoint whose ICE gathering never finishes
    pub(crate) fn idle_ingress() -> Self {
        Self::build(EndpointKind::Ingress, false)
    }

    fn fresh(&self) -> Self {
        Self::build(self.kind, self.gathers)
    }

    pub(crate) fn local_sdp(&self) -> String {
        PUBLISHER_OFFER.to_string()
    }

    pub(crate) fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub(crate) fn init_complete(&self) -> bool {
        self.init_complete.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn infos(&self) -> Vec<TrackSdpInfo> {
        self.infos.lock().await.clone()
    }

    pub(crate) async fn track_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tracks.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RtpEndpoint for MockEndpoint {
    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn local_description(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RTCSessionDescription> {
        if !self.gathers {
            cancel.cancelled().await;
            return Err(RtpError::IceGatheringInterrupted);
        }
        let sdp = self.local_sdp();
        let desc = match self.kind {
            EndpointKind::Ingress => RTCSessionDescription::answer(sdp)?,
            EndpointKind::Egress => RTCSessionDescription::offer(sdp)?,
        };
        Ok(desc)
    }

    async fn set_answer(&self, _answer: RTCSessionDescription) -> Result<()> {
        self.answers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_init_complete(&self) {
        self.init_complete.store(true, Ordering::SeqCst);
    }

    async fn set_new_offer(
        &self,
        _offer: RTCSessionDescription,
        _cancel: &CancellationToken,
    ) -> Result<RTCSessionDescription> {
        Ok(RTCSessionDescription::answer(self.local_sdp())?)
    }

    async fn add_track(&self, track: &TrackInfo) -> Result<()> {
        if self.is_closed() {
            return Err(RtpError::EndpointClosed);
        }
        if self.tracks.lock().await.insert(track.track_id().to_string()) {
            let mut info = track.sdp.clone();
            info.egress_track_id = track.track_id().to_string();
            info.egress_mid = format!("egress-{}", info.ingress_mid);
            self.infos.lock().await.push(info);
        }
        Ok(())
    }

    async fn remove_track(&self, track: &TrackInfo) -> Result<()> {
        self.tracks.lock().await.remove(track.track_id());
        self.infos
            .lock()
            .await
            .retain(|info| info.egress_track_id != track.track_id());
        Ok(())
    }

    async fn has_track(&self, track_id: &str) -> bool {
        self.tracks.lock().await.contains(track_id)
    }

    async fn set_ingress_mute(&self, mid: &str, mute: bool) -> Option<TrackSdpInfo> {
        let mut infos = self.infos.lock().await;
        let info = infos.iter_mut().find(|info| info.ingress_mid == mid)?;
        info.mute = mute;
        Some(info.clone())
    }

    async fn set_egress_mute(&self, info_id: Uuid, mute: bool) -> Option<TrackSdpInfo> {
        let mut infos = self.infos.lock().await;
        let info = infos.iter_mut().find(|info| info.id == info_id)?;
        info.mute = mute;
        Some(info.clone())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Engine handing out fresh copies of two endpoint templates. Keeps every
/// endpoint and handler it created for inspection.
pub(crate) struct MockEngine {
    ingress_template: MockEndpoint,
    egress_template: MockEndpoint,
    ingresses: std::sync::Mutex<Vec<Arc<MockEndpoint>>>,
    egresses: std::sync::Mutex<Vec<Arc<MockEndpoint>>>,
    handlers: std::sync::Mutex<Vec<Arc<dyn StateEventHandler>>>,
    dispatchers: std::sync::Mutex<Vec<Arc<dyn TrackDispatcher>>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::with_endpoints(MockEndpoint::ingress(), MockEndpoint::egress())
    }
}

impl MockEngine {
    pub(crate) fn with_endpoints(ingress: MockEndpoint, egress: MockEndpoint) -> Self {
        Self {
            ingress_template: ingress,
            egress_template: egress,
            ingresses: std::sync::Mutex::new(Vec::new()),
            egresses: std::sync::Mutex::new(Vec::new()),
            handlers: std::sync::Mutex::new(Vec::new()),
            dispatchers: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Most recently created ingress endpoint
    pub(crate) fn ingress(&self) -> Arc<MockEndpoint> {
        self.ingresses.lock().unwrap().last().cloned().unwrap()
    }

    pub(crate) fn egress(&self) -> Arc<MockEndpoint> {
        self.egresses.lock().unwrap().last().cloned().unwrap()
    }

    pub(crate) fn ingress_at(&self, n: usize) -> Arc<MockEndpoint> {
        self.ingresses.lock().unwrap()[n].clone()
    }

    /// Lets the n-th ingress endpoint announce a received track
    pub(crate) async fn receive_track(&self, n: usize, track: TrackInfo) {
        let dispatcher = self.dispatchers.lock().unwrap()[n].clone();
        dispatcher.dispatch_add_track(track).await;
    }

    pub(crate) fn ingress_count(&self) -> usize {
        self.ingresses.lock().unwrap().len()
    }

    /// Reports a lost connection through the handler of the n-th ingress
    pub(crate) async fn lose_ingress_connection(&self, n: usize) {
        let handler = self.handlers.lock().unwrap()[n].clone();
        handler.on_connection_lost().await;
    }
}

#[async_trait]
impl RtpEngine for MockEngine {
    async fn establish_ingress_endpoint(
        &self,
        _session: &CancellationToken,
        session_id: Uuid,
        _live_stream_id: Uuid,
        offer: RTCSessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>> {
        let Some(dispatcher) = options.dispatcher else {
            return Err(RtpError::TrackDispatchMissing);
        };
        let infos = ingress_track_sdp_infos(&offer, session_id)?;

        let endpoint = self.ingress_template.fresh();
        *endpoint.infos.lock().await = infos;
        let endpoint = Arc::new(endpoint);
        self.ingresses.lock().unwrap().push(endpoint.clone());
        self.dispatchers.lock().unwrap().push(dispatcher);
        if let Some(handler) = options.handler {
            self.handlers.lock().unwrap().push(handler);
        }
        Ok(endpoint)
    }

    async fn establish_egress_endpoint(
        &self,
        _session: &CancellationToken,
        _session_id: Uuid,
        _live_stream_id: Uuid,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>> {
        let endpoint = Arc::new(self.egress_template.fresh());
        if let Some(source) = options.track_source {
            for track in source.current_tracks().await {
                endpoint.add_track(&track).await?;
            }
        }
        self.egresses.lock().unwrap().push(endpoint.clone());
        Ok(endpoint)
    }
}

#[derive(Default)]
pub(crate) struct MockLiveSender {
    tracks: Mutex<Vec<String>>,
    started: AtomicBool,
}

impl MockLiveSender {
    pub(crate) async fn tracks(&self) -> Vec<String> {
        self.tracks.lock().await.clone()
    }
}

#[async_trait]
impl LiveStreamSender for MockLiveSender {
    async fn add_track(&self, track: &TrackInfo) {
        self.tracks.lock().await.push(track.track_id().to_string());
    }

    async fn remove_track(&self, track: &TrackInfo) {
        self.tracks.lock().await.retain(|t| t != track.track_id());
    }

    async fn start(&self, _info: &LiveStreamInfo) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    async fn is_live(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

pub(crate) fn test_hub() -> Hub {
    Hub::spawn(
        Uuid::new_v4(),
        Arc::new(SessionRepository::new()),
        Arc::new(MockLiveSender::default()),
        CancellationToken::new(),
        &TaskTracker::new(),
        Duration::from_secs(1),
    )
}

pub(crate) fn test_session() -> (SessionHandle, broadcast::Receiver<TrackEvent>) {
    test_session_for(Uuid::new_v4())
}

pub(crate) fn test_session_for(user: Uuid) -> (SessionHandle, broadcast::Receiver<TrackEvent>) {
    SessionHandle::detached(user, 16)
}

pub(crate) fn test_track(session_id: Uuid, id: &str, purpose: Purpose) -> TrackInfo {
    let mut sdp = TrackSdpInfo::new(session_id);
    sdp.purpose = purpose;
    sdp.ingress_track_id = id.to_string();
    track_for(sdp)
}

/// Local track for an ingress track info
pub(crate) fn track_for(sdp: TrackSdpInfo) -> TrackInfo {
    let local = TrackLocalStaticRTP::new(
        RTCRtpCodecCapability {
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
        sdp.ingress_track_id.clone(),
        "stream-a".to_string(),
    );
    TrackInfo::new(sdp, Arc::new(local))
}
