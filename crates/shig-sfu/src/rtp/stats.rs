use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

/// Periodically logs transport statistics of a peer connection.
pub(crate) fn spawn_stats_logger(
    tasks: &TaskTracker,
    pc: Arc<RTCPeerConnection>,
    label: String,
    interval: Duration,
    quit: CancellationToken,
) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = quit.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let stats = pc.get_stats().await;
            for report in stats.reports.values() {
                match report {
                    StatsReportType::CandidatePair(pair) if pair.nominated => {
                        tracing::debug!(
                            "{} stats: pair {}:{} bytes {}/{}",
                            label,
                            pair.local_candidate_id,
                            pair.remote_candidate_id,
                            pair.bytes_sent,
                            pair.bytes_received
                        );
                    }
                    StatsReportType::InboundRTP(inbound) => {
                        tracing::debug!(
                            "{} stats: inbound {} ssrc {} packets {}",
                            label,
                            inbound.kind,
                            inbound.ssrc,
                            inbound.packets_received
                        );
                    }
                    StatsReportType::OutboundRTP(outbound) => {
                        tracing::debug!(
                            "{} stats: outbound {} ssrc {} packets {}",
                            label,
                            outbound.kind,
                            outbound.ssrc,
                            outbound.packets_sent
                        );
                    }
                    _ => {}
                }
            }
        }
    });
}
