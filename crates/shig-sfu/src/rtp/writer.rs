use super::track_info::TrackInfo;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webrtc::interceptor::Error as InterceptorError;
use webrtc::srtp::Error as SrtpError;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::Error as UtilError;

/// Read errors of a remote track that mean it is gone rather than broken
fn is_track_end(e: &webrtc::Error) -> bool {
    matches!(
        e,
        webrtc::Error::ErrClosedPipe
            | webrtc::Error::ErrRTPReceiverNil
            | webrtc::Error::Util(UtilError::ErrBufferClosed)
            | webrtc::Error::Interceptor(InterceptorError::ErrIoEOF)
            | webrtc::Error::Interceptor(InterceptorError::Util(UtilError::ErrBufferClosed))
            | webrtc::Error::Srtp(SrtpError::Util(UtilError::ErrBufferClosed))
    )
}

/// Copies RTP from a publisher's remote track into the local track that
/// subscribers are fed from.
pub(crate) struct TrackWriter {
    remote: Arc<TrackRemote>,
    track: TrackInfo,
    quit: CancellationToken,
}

impl TrackWriter {
    pub(crate) fn new(remote: Arc<TrackRemote>, track: TrackInfo, quit: CancellationToken) -> Self {
        Self {
            remote,
            track,
            quit,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.quit.is_cancelled()
    }

    /// Runs until the remote track ends, a write fails or the writer is
    /// closed.
    pub(crate) async fn run(&self) {
        let track_id = self.track.track_id().to_string();
        tracing::debug!("Track writer for {} started", track_id);

        while self.is_running() {
            let packet = tokio::select! {
                _ = self.quit.cancelled() => break,
                result = self.remote.read_rtp() => match result {
                    Ok((packet, _attributes)) => packet,
                    Err(e) => {
                        if is_track_end(&e) {
                            tracing::debug!("Remote track {} ended", track_id);
                        } else {
                            tracing::warn!("Reading remote track {} failed: {}", track_id, e);
                        }
                        break;
                    }
                }
            };

            match self.track.track.write_rtp(&packet).await {
                Ok(_) | Err(webrtc::Error::ErrClosedPipe) => {}
                Err(e) => {
                    tracing::warn!("Writing local track {} failed: {}", track_id, e);
                    break;
                }
            }
            self.track.publish_live(&packet);
        }

        self.close();
        tracing::debug!("Track writer for {} stopped", track_id);
    }

    pub(crate) fn close(&self) {
        self.quit.cancel();
    }
}
