//! Feed for the external RTMP bridge.
//!
//! While a lobby is live, the RTP of its main tracks is relayed over UDP to a
//! local bridge process (ffmpeg) that pushes it to the RTMP target.

use super::error::{Result, RtpError};
use super::track_info::TrackInfo;
use async_trait::async_trait;
use serde::Deserialize;
use shig_protocol::{LiveStreamInfo, Purpose};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::util::Marshal;

const AUDIO_PAYLOAD_TYPE: u8 = 111;
const VIDEO_PAYLOAD_TYPE: u8 = 96;

#[async_trait]
pub trait LiveStreamSender: Send + Sync {
    async fn add_track(&self, track: &TrackInfo);
    async fn remove_track(&self, track: &TrackInfo);
    async fn start(&self, info: &LiveStreamInfo) -> Result<()>;
    async fn stop(&self);
    async fn is_live(&self) -> bool;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveForwardConfig {
    pub host: String,
    pub audio_port: u16,
    pub video_port: u16,
}

impl Default for LiveForwardConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            audio_port: 4000,
            video_port: 4002,
        }
    }
}

struct Live {
    socket: Arc<UdpSocket>,
    audio: SocketAddr,
    video: SocketAddr,
    quit: CancellationToken,
    forwards: HashMap<String, CancellationToken>,
}

#[derive(Default)]
struct Inner {
    tracks: HashMap<String, TrackInfo>,
    live: Option<Live>,
}

/// Relays main tracks to UDP ports of the RTMP bridge
pub struct UdpLiveForwarder {
    config: LiveForwardConfig,
    inner: Mutex<Inner>,
    tasks: TaskTracker,
}

impl UdpLiveForwarder {
    pub fn new(config: LiveForwardConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            tasks: TaskTracker::new(),
        }
    }

    async fn resolve(&self, port: u16) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.config.host, port);
        let resolved = match lookup_host(target.as_str()).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                addrs
                    .iter()
                    .find(|addr| addr.is_ipv4())
                    .or(addrs.first())
                    .copied()
            }
            Err(e) => {
                tracing::warn!("Resolving live bridge {} failed: {}", target, e);
                None
            }
        };
        resolved.ok_or(RtpError::UnresolvedLiveHost(target))
    }

    fn forward(&self, live: &mut Live, track: &TrackInfo) {
        let track_id = track.track_id().to_string();
        if live.forwards.contains_key(&track_id) {
            return;
        }
        let (addr, payload_type) = match track.track.kind() {
            RTPCodecType::Audio => (live.audio, AUDIO_PAYLOAD_TYPE),
            RTPCodecType::Video => (live.video, VIDEO_PAYLOAD_TYPE),
            kind => {
                tracing::warn!("Track {} of kind {} is not forwarded", track_id, kind);
                return;
            }
        };
        let quit = live.quit.child_token();
        live.forwards.insert(track_id.clone(), quit.clone());

        let socket = Arc::clone(&live.socket);
        let mut packets = track.subscribe_live();
        self.tasks.spawn(async move {
            loop {
                let mut packet = tokio::select! {
                    _ = quit.cancelled() => break,
                    received = packets.recv() => match received {
                        Ok(packet) => packet,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Live forward of {} skipped {} packets", track_id, skipped);
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                };
                packet.header.payload_type = payload_type;
                let data = match packet.marshal() {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!("Marshalling RTP of {} failed: {}", track_id, e);
                        continue;
                    }
                };
                if let Err(e) = socket.send_to(&data, addr).await {
                    tracing::warn!("Sending RTP of {} to {} failed: {}", track_id, addr, e);
                }
            }
        });
    }
}

#[async_trait]
impl LiveStreamSender for UdpLiveForwarder {
    async fn add_track(&self, track: &TrackInfo) {
        if track.purpose() != Purpose::Main {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner
            .tracks
            .insert(track.track_id().to_string(), track.clone());
        if let Some(live) = inner.live.as_mut() {
            self.forward(live, track);
        }
    }

    async fn remove_track(&self, track: &TrackInfo) {
        let mut inner = self.inner.lock().await;
        inner.tracks.remove(track.track_id());
        if let Some(quit) = inner
            .live
            .as_mut()
            .and_then(|live| live.forwards.remove(track.track_id()))
        {
            quit.cancel();
        }
    }

    async fn start(&self, info: &LiveStreamInfo) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.live.is_some() {
            return Ok(());
        }
        let audio = self.resolve(self.config.audio_port).await?;
        let video = self.resolve(self.config.video_port).await?;
        let bind = if video.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind).await?;
        let mut live = Live {
            socket: Arc::new(socket),
            audio,
            video,
            quit: CancellationToken::new(),
            forwards: HashMap::new(),
        };
        let tracks: Vec<TrackInfo> = inner.tracks.values().cloned().collect();
        for track in &tracks {
            self.forward(&mut live, track);
        }
        inner.live = Some(live);
        tracing::info!(
            "Live forwarding of {} tracks started for {}",
            tracks.len(),
            info.rtmp_url
        );
        Ok(())
    }

    async fn stop(&self) {
        if let Some(live) = self.inner.lock().await.live.take() {
            live.quit.cancel();
            tracing::info!("Live forwarding stopped");
        }
    }

    async fn is_live(&self) -> bool {
        self.inner.lock().await.live.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::track_info::TrackSdpInfo;
    use std::time::Duration;
    use uuid::Uuid;
    use webrtc::rtp::packet::Packet;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
    use webrtc::util::Unmarshal;

    fn video_track(purpose: Purpose) -> TrackInfo {
        let mut sdp = TrackSdpInfo::new(Uuid::new_v4());
        sdp.purpose = purpose;
        let local = TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video-a".to_string(),
            "stream-a".to_string(),
        );
        TrackInfo::new(sdp, Arc::new(local))
    }

    fn stream_info() -> LiveStreamInfo {
        LiveStreamInfo {
            stream_key: "key".to_string(),
            rtmp_url: "rtmp://localhost/live".to_string(),
        }
    }

    #[tokio::test]
    async fn forwards_main_track_while_live() {
        let bridge = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = bridge.local_addr().unwrap().port();
        let forwarder = UdpLiveForwarder::new(LiveForwardConfig {
            host: "127.0.0.1".to_string(),
            audio_port: port,
            video_port: port,
        });

        let track = video_track(Purpose::Main);
        forwarder.add_track(&track).await;
        forwarder.start(&stream_info()).await.unwrap();
        assert!(forwarder.is_live().await);

        let mut packet = Packet::default();
        packet.header.version = 2;
        packet.header.payload_type = 100;
        packet.header.sequence_number = 7;
        track.publish_live(&packet);

        let mut buf = vec![0u8; 1500];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), bridge.recv_from(&mut buf))
            .await
            .expect("no packet forwarded")
            .unwrap();
        let mut data = &buf[..n];
        let received = Packet::unmarshal(&mut data).unwrap();
        assert_eq!(received.header.payload_type, VIDEO_PAYLOAD_TYPE);
        assert_eq!(received.header.sequence_number, 7);

        forwarder.stop().await;
        assert!(!forwarder.is_live().await);
    }

    #[tokio::test]
    async fn resolves_bridge_host_names() {
        let bridge = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = bridge.local_addr().unwrap().port();
        let forwarder = UdpLiveForwarder::new(LiveForwardConfig {
            host: "localhost".to_string(),
            audio_port: port,
            video_port: port,
        });
        let track = video_track(Purpose::Main);
        forwarder.add_track(&track).await;
        forwarder.start(&stream_info()).await.unwrap();

        let live_video = forwarder.inner.lock().await.live.as_ref().unwrap().video;
        assert!(live_video.ip().is_loopback());
        assert_eq!(live_video.port(), port);
        forwarder.stop().await;
    }

    #[tokio::test]
    async fn unresolvable_bridge_host_fails_start() {
        let forwarder = UdpLiveForwarder::new(LiveForwardConfig {
            host: "bridge.invalid".to_string(),
            ..Default::default()
        });
        let result = forwarder.start(&stream_info()).await;
        assert!(matches!(result, Err(RtpError::UnresolvedLiveHost(_))));
        assert!(!forwarder.is_live().await);
    }

    #[tokio::test]
    async fn ignores_guest_tracks() {
        let forwarder = UdpLiveForwarder::new(LiveForwardConfig::default());
        let track = video_track(Purpose::Guest);
        forwarder.add_track(&track).await;
        assert!(forwarder.inner.lock().await.tracks.is_empty());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let forwarder = UdpLiveForwarder::new(LiveForwardConfig::default());
        forwarder.start(&stream_info()).await.unwrap();
        forwarder.start(&stream_info()).await.unwrap();
        forwarder.stop().await;
        forwarder.stop().await;
        assert!(!forwarder.is_live().await);
    }
}
