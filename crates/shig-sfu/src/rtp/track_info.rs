use shig_protocol::Purpose;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

const LIVE_TAP_CAPACITY: usize = 256;

/// SDP-level description of a published track, from the ingress side
/// (where it comes from) and the egress side (where it is sent to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSdpInfo {
    pub id: Uuid,
    pub session_id: Uuid,
    pub ingress_mid: String,
    pub ingress_track_id: String,
    pub egress_mid: String,
    pub egress_track_id: String,
    pub purpose: Purpose,
    pub mute: bool,
    pub info: String,
}

impl TrackSdpInfo {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            ingress_mid: String::new(),
            ingress_track_id: String::new(),
            egress_mid: String::new(),
            egress_track_id: String::new(),
            purpose: Purpose::Guest,
            mute: false,
            info: "Guest".to_string(),
        }
    }

    /// Applies an SDP media title of the form `"<purpose> <mute> <info>"`.
    /// Titles that do not have three parts are ignored.
    pub fn apply_media_title(&mut self, title: &str) {
        let parts: Vec<&str> = title.splitn(3, ' ').collect();
        if parts.len() != 3 {
            return;
        }
        self.purpose = parts[0].parse().unwrap_or_default();
        self.mute = parts[1].trim() == "1";
        self.info = parts[2].to_string();
    }

    pub fn media_title(&self) -> String {
        let muted = if self.mute { "1" } else { "2" };
        format!("{} {} {}", self.purpose, muted, self.info)
    }
}

/// A local track that carries the media of one published remote track.
#[derive(Clone)]
pub struct TrackInfo {
    pub sdp: TrackSdpInfo,
    pub track: Arc<TrackLocalStaticRTP>,
    live_tap: broadcast::Sender<Packet>,
}

impl TrackInfo {
    pub fn new(sdp: TrackSdpInfo, track: Arc<TrackLocalStaticRTP>) -> Self {
        let (live_tap, _) = broadcast::channel(LIVE_TAP_CAPACITY);
        Self {
            sdp,
            track,
            live_tap,
        }
    }

    pub fn track_id(&self) -> &str {
        self.track.id()
    }

    pub fn session_id(&self) -> Uuid {
        self.sdp.session_id
    }

    pub fn purpose(&self) -> Purpose {
        self.sdp.purpose
    }

    /// Copies of the packets written to the local track, for the live sender.
    pub fn subscribe_live(&self) -> broadcast::Receiver<Packet> {
        self.live_tap.subscribe()
    }

    pub(crate) fn publish_live(&self, packet: &Packet) {
        if self.live_tap.receiver_count() > 0 {
            let _ = self.live_tap.send(packet.clone());
        }
    }
}

/// Track SDP infos of one endpoint
#[derive(Default)]
pub struct TrackSdpInfoRepository {
    infos: RwLock<HashMap<Uuid, TrackSdpInfo>>,
}

impl TrackSdpInfoRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, info: TrackSdpInfo) {
        self.infos.write().await.insert(info.id, info);
    }

    pub async fn get(&self, id: Uuid) -> Option<TrackSdpInfo> {
        self.infos.read().await.get(&id).cloned()
    }

    pub async fn delete(&self, id: Uuid) -> Option<TrackSdpInfo> {
        self.infos.write().await.remove(&id)
    }

    pub async fn by_ingress_track_id(&self, track_id: &str) -> Option<TrackSdpInfo> {
        self.infos
            .read()
            .await
            .values()
            .find(|info| info.ingress_track_id == track_id)
            .cloned()
    }

    pub async fn by_ingress_mid(&self, mid: &str) -> Option<TrackSdpInfo> {
        self.infos
            .read()
            .await
            .values()
            .find(|info| info.ingress_mid == mid)
            .cloned()
    }

    pub async fn by_egress_track_id(&self, track_id: &str) -> Option<TrackSdpInfo> {
        self.infos
            .read()
            .await
            .values()
            .find(|info| info.egress_track_id == track_id)
            .cloned()
    }

    /// Updates the info with the given id in place and returns the new value.
    pub async fn update<F>(&self, id: Uuid, f: F) -> Option<TrackSdpInfo>
    where
        F: FnOnce(&mut TrackSdpInfo),
    {
        let mut infos = self.infos.write().await;
        let info = infos.get_mut(&id)?;
        f(info);
        Some(info.clone())
    }

    pub async fn snapshot(&self) -> Vec<TrackSdpInfo> {
        self.infos.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.infos.read().await.len()
    }
}
