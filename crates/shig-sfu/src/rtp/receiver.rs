use super::dispatcher::TrackDispatcher;
use super::track_info::{TrackInfo, TrackSdpInfo, TrackSdpInfoRepository};
use super::writer::TrackWriter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_remote::TrackRemote;

/// Receiving half of an ingress endpoint.
///
/// Every remote audio/video track gets a local track and a writer; the local
/// track is announced through the dispatcher once the ingress handshake is
/// complete and withdrawn when the writer stops.
pub(crate) struct Receiver {
    session_id: Uuid,
    dispatcher: Arc<dyn TrackDispatcher>,
    repo: Arc<TrackSdpInfoRepository>,
    handshake: CancellationToken,
    quit: CancellationToken,
    tasks: TaskTracker,
}

impl Receiver {
    pub(crate) fn new(
        session_id: Uuid,
        dispatcher: Arc<dyn TrackDispatcher>,
        repo: Arc<TrackSdpInfoRepository>,
        handshake: CancellationToken,
        quit: CancellationToken,
        tasks: TaskTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            dispatcher,
            repo,
            handshake,
            quit,
            tasks,
        })
    }

    pub(crate) async fn on_track(
        self: Arc<Self>,
        remote: Arc<TrackRemote>,
        transceiver: Arc<RTCRtpTransceiver>,
    ) {
        let kind = remote.kind();
        if !matches!(kind, RTPCodecType::Audio | RTPCodecType::Video) {
            tracing::warn!(session = %self.session_id, "Ignoring remote track of kind {}", kind);
            return;
        }

        let remote_id = remote.id();
        let mut info = match self.repo.by_ingress_track_id(&remote_id).await {
            Some(info) => info,
            None => {
                let mut info = TrackSdpInfo::new(self.session_id);
                info.ingress_track_id = remote_id.clone();
                info
            }
        };
        if let Some(mid) = transceiver.mid() {
            info.ingress_mid = mid.to_string();
        }
        self.repo.set(info.clone()).await;

        let local = Arc::new(TrackLocalStaticRTP::new(
            remote.codec().capability,
            remote_id.clone(),
            remote.stream_id(),
        ));
        let track = TrackInfo::new(info, local);
        tracing::info!(
            session = %self.session_id,
            "New {} track {} ({:?})",
            kind,
            remote_id,
            track.purpose()
        );

        if !self.announce(track.clone()).await {
            return;
        }

        let writer = TrackWriter::new(remote, track.clone(), self.quit.child_token());
        let receiver = Arc::clone(&self);
        self.tasks.spawn(async move {
            writer.run().await;
            receiver.dispatcher.dispatch_remove_track(track.clone()).await;
            receiver.repo.delete(track.sdp.id).await;
        });
    }

    /// Hands a new track to the dispatcher once the ingress handshake is
    /// complete. Returns `false` if the endpoint closed first.
    async fn announce(&self, track: TrackInfo) -> bool {
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => return false,
            _ = self.handshake.cancelled() => {}
        }
        self.dispatcher.dispatch_add_track(track).await;
        true
    }
}
