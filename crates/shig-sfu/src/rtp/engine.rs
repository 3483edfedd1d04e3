use super::config::RtpConfig;
use super::endpoint::{Endpoint, EndpointKind, EndpointOptions, RtpEndpoint};
use super::error::{Result, RtpError};
use super::receiver::Receiver;
use super::sdp::ingress_track_sdp_infos;
use super::track_info::TrackSdpInfoRepository;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const SIGNAL_CHANNEL_LABEL: &str = "data";

/// Builds the endpoints of a session
#[async_trait]
pub trait RtpEngine: Send + Sync {
    /// Answers a publisher's offer with a new ingress endpoint.
    async fn establish_ingress_endpoint(
        &self,
        session: &CancellationToken,
        session_id: Uuid,
        live_stream_id: Uuid,
        offer: RTCSessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>>;

    /// Creates an egress endpoint; its offer is available through
    /// `local_description`.
    async fn establish_egress_endpoint(
        &self,
        session: &CancellationToken,
        session_id: Uuid,
        live_stream_id: Uuid,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>>;
}

/// WebRTC engine shared by all lobbies
pub struct Engine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    stats_interval: Option<Duration>,
}

impl Engine {
    pub fn new(config: &RtpConfig) -> Result<Self> {
        config.validate()?;

        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let stats_interval = match config.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        tracing::info!(
            "RTP engine ready with {} ICE servers",
            config.ice_servers.len()
        );

        Ok(Self {
            api,
            ice_servers: config.rtc_ice_servers(),
            stats_interval,
        })
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        Ok(Arc::new(self.api.new_peer_connection(config).await?))
    }

    async fn setup_ingress(
        &self,
        endpoint: &Arc<Endpoint>,
        session_id: Uuid,
        repo: Arc<TrackSdpInfoRepository>,
        offer: RTCSessionDescription,
        options: &EndpointOptions,
    ) -> Result<()> {
        let dispatcher = options
            .dispatcher
            .clone()
            .ok_or(RtpError::TrackDispatchMissing)?;
        let pc = endpoint.peer_connection();

        let receiver = Receiver::new(
            session_id,
            dispatcher,
            repo,
            endpoint.init_complete_token(),
            endpoint.closed_token(),
            endpoint.tasks().clone(),
        );
        let tasks = endpoint.tasks().clone();
        pc.on_track(Box::new(move |track, _receiver, transceiver| {
            let receiver = Arc::clone(&receiver);
            tasks.spawn(receiver.on_track(track, transceiver));
            Box::pin(async {})
        }));

        endpoint.watch_connection_state();

        if let Some(handler) = options.handler.clone() {
            pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    tracing::debug!("Data channel '{}' opened by publisher", channel.label());
                    handler.on_data_channel(channel).await;
                })
            }));
        }

        pc.set_remote_description(offer).await?;
        let answer = pc.create_answer(None).await?;
        let done = pc.gathering_complete_promise().await;
        pc.set_local_description(answer).await?;
        endpoint.watch_gathering(done);
        Ok(())
    }

    async fn setup_egress(&self, endpoint: &Arc<Endpoint>, options: &EndpointOptions) -> Result<()> {
        let pc = endpoint.peer_connection();
        endpoint.watch_connection_state();

        if let Some(source) = options.track_source.clone() {
            endpoint.add_current_tracks_after_init(source);
        }
        endpoint.watch_negotiation();

        if options.data_channel {
            let init = RTCDataChannelInit {
                ordered: Some(false),
                max_retransmits: Some(0),
                ..Default::default()
            };
            let channel = pc
                .create_data_channel(SIGNAL_CHANNEL_LABEL, Some(init))
                .await?;
            if let Some(handler) = &options.handler {
                handler.on_data_channel(channel).await;
            }
        }

        let offer = pc.create_offer(None).await?;
        let done = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await?;
        endpoint.watch_gathering(done);
        Ok(())
    }

    fn start_stats(&self, endpoint: &Arc<Endpoint>) {
        if let Some(interval) = self.stats_interval {
            endpoint.start_stats(interval);
        }
    }
}

#[async_trait]
impl RtpEngine for Engine {
    async fn establish_ingress_endpoint(
        &self,
        session: &CancellationToken,
        session_id: Uuid,
        live_stream_id: Uuid,
        offer: RTCSessionDescription,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>> {
        if options.dispatcher.is_none() {
            return Err(RtpError::TrackDispatchMissing);
        }

        let repo = Arc::new(TrackSdpInfoRepository::new());
        for info in ingress_track_sdp_infos(&offer, session_id)? {
            repo.set(info).await;
        }

        let pc = self.new_peer_connection().await?;
        let endpoint = Endpoint::new(
            EndpointKind::Ingress,
            session_id,
            pc,
            Arc::clone(&repo),
            options.handler.clone(),
            session,
        );

        if let Err(e) = self
            .setup_ingress(&endpoint, session_id, repo, offer, &options)
            .await
        {
            endpoint.close().await;
            return Err(e);
        }
        self.start_stats(&endpoint);

        tracing::info!(
            session = %session_id,
            lobby = %live_stream_id,
            "Ingress endpoint established"
        );
        Ok(endpoint)
    }

    async fn establish_egress_endpoint(
        &self,
        session: &CancellationToken,
        session_id: Uuid,
        live_stream_id: Uuid,
        options: EndpointOptions,
    ) -> Result<Arc<dyn RtpEndpoint>> {
        let pc = self.new_peer_connection().await?;
        let endpoint = Endpoint::new(
            EndpointKind::Egress,
            session_id,
            pc,
            Arc::new(TrackSdpInfoRepository::new()),
            options.handler.clone(),
            session,
        );

        if let Err(e) = self.setup_egress(&endpoint, &options).await {
            endpoint.close().await;
            return Err(e);
        }
        self.start_stats(&endpoint);

        tracing::info!(
            session = %session_id,
            lobby = %live_stream_id,
            "Egress endpoint established"
        );
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::sdp::tests::publisher_offer;
    use crate::rtp::track_info::{TrackInfo, TrackSdpInfo};
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

    fn engine() -> Engine {
        Engine::new(&RtpConfig::default()).unwrap()
    }

    fn track(id: &str) -> TrackInfo {
        let local = TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
            id.to_string(),
            "stream-a".to_string(),
        );
        TrackInfo::new(TrackSdpInfo::new(Uuid::new_v4()), Arc::new(local))
    }

    #[tokio::test]
    async fn ingress_requires_dispatcher() {
        let result = engine()
            .establish_ingress_endpoint(
                &CancellationToken::new(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                publisher_offer(),
                EndpointOptions::new(),
            )
            .await;
        assert!(matches!(result, Err(RtpError::TrackDispatchMissing)));
    }

    #[tokio::test]
    async fn add_and_remove_track_round_trip() {
        let endpoint = engine()
            .establish_egress_endpoint(
                &CancellationToken::new(),
                Uuid::new_v4(),
                Uuid::new_v4(),
                EndpointOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::Egress);

        let video = track("video-a");
        endpoint.add_track(&video).await.unwrap();
        assert!(endpoint.has_track("video-a").await);

        // a second add of the same track is a no-op
        endpoint.add_track(&video).await.unwrap();
        assert!(endpoint.has_track("video-a").await);

        let info = endpoint.set_egress_mute(video.sdp.id, true).await.unwrap();
        assert_eq!(info.egress_track_id, "video-a");
        assert!(info.mute);

        endpoint.remove_track(&video).await.unwrap();
        assert!(!endpoint.has_track("video-a").await);

        endpoint.close().await;
        assert!(matches!(
            endpoint.add_track(&video).await,
            Err(RtpError::EndpointClosed)
        ));
    }
}
