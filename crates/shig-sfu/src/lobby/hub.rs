use super::session_repository::SessionRepository;
use crate::rtp::{LiveStreamSender, TrackDispatcher, TrackInfo, TrackSdpInfo, TrackSource};
use async_trait::async_trait;
use shig_protocol::Purpose;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

const HUB_QUEUE_SIZE: usize = 64;

/// What a session's egress side has to follow
#[derive(Clone)]
pub(crate) enum TrackEvent {
    Add(TrackInfo),
    Remove(TrackInfo),
    Mute(TrackSdpInfo),
}

enum HubRequest {
    AddTrack(TrackInfo),
    RemoveTrack(TrackInfo),
    MuteTrack(TrackSdpInfo),
    TrackList {
        session_id: Uuid,
        reply: oneshot::Sender<Vec<TrackInfo>>,
    },
}

/// Fan-out of the tracks published in a lobby.
///
/// A single worker owns the track map. Events are pushed into each session's
/// bounded track queue without waiting; a session that falls behind loses the
/// oldest events.
#[derive(Clone)]
pub(crate) struct Hub {
    requests: mpsc::Sender<HubRequest>,
    quit: CancellationToken,
    timeout: Duration,
}

struct HubWorker {
    lobby_id: Uuid,
    sessions: Arc<SessionRepository>,
    live: Arc<dyn LiveStreamSender>,
    tracks: HashMap<String, TrackInfo>,
}

impl Hub {
    pub(crate) fn spawn(
        lobby_id: Uuid,
        sessions: Arc<SessionRepository>,
        live: Arc<dyn LiveStreamSender>,
        quit: CancellationToken,
        tasks: &TaskTracker,
        timeout: Duration,
    ) -> Self {
        let (requests, rx) = mpsc::channel(HUB_QUEUE_SIZE);
        let worker = HubWorker {
            lobby_id,
            sessions,
            live,
            tracks: HashMap::new(),
        };
        tasks.spawn(worker.run(rx, quit.clone()));
        Self {
            requests,
            quit,
            timeout,
        }
    }

    async fn dispatch(&self, request: HubRequest) -> bool {
        tokio::select! {
            sent = self.requests.send(request) => sent.is_ok(),
            _ = self.quit.cancelled() => false,
            _ = tokio::time::sleep(self.timeout) => {
                tracing::warn!("Hub dispatch timed out");
                false
            }
        }
    }

    pub(crate) async fn dispatch_mute(&self, info: TrackSdpInfo) {
        self.dispatch(HubRequest::MuteTrack(info)).await;
    }

    /// Tracks published by everyone except the given session
    pub(crate) async fn track_list(&self, session_id: Uuid) -> Vec<TrackInfo> {
        let (reply, rx) = oneshot::channel();
        if !self
            .dispatch(HubRequest::TrackList { session_id, reply })
            .await
        {
            return Vec::new();
        }
        tokio::select! {
            tracks = rx => tracks.unwrap_or_default(),
            _ = self.quit.cancelled() => Vec::new(),
            _ = tokio::time::sleep(self.timeout) => Vec::new(),
        }
    }

    pub(crate) fn track_source(&self, session_id: Uuid) -> Arc<dyn TrackSource> {
        Arc::new(HubTrackSource {
            hub: self.clone(),
            session_id,
        })
    }
}

#[async_trait]
impl TrackDispatcher for Hub {
    async fn dispatch_add_track(&self, track: TrackInfo) {
        self.dispatch(HubRequest::AddTrack(track)).await;
    }

    async fn dispatch_remove_track(&self, track: TrackInfo) {
        self.dispatch(HubRequest::RemoveTrack(track)).await;
    }
}

struct HubTrackSource {
    hub: Hub,
    session_id: Uuid,
}

#[async_trait]
impl TrackSource for HubTrackSource {
    async fn current_tracks(&self) -> Vec<TrackInfo> {
        self.hub.track_list(self.session_id).await
    }
}

impl HubWorker {
    async fn run(mut self, mut requests: mpsc::Receiver<HubRequest>, quit: CancellationToken) {
        loop {
            tokio::select! {
                _ = quit.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                }
            }
        }
        tracing::debug!(lobby = %self.lobby_id, "Hub stopped");
    }

    async fn handle(&mut self, request: HubRequest) {
        match request {
            HubRequest::AddTrack(track) => self.on_add_track(track).await,
            HubRequest::RemoveTrack(track) => self.on_remove_track(track).await,
            HubRequest::MuteTrack(info) => self.on_mute_track(info).await,
            HubRequest::TrackList { session_id, reply } => {
                let tracks = self
                    .tracks
                    .values()
                    .filter(|t| t.session_id() != session_id)
                    .cloned()
                    .collect();
                let _ = reply.send(tracks);
            }
        }
    }

    async fn broadcast(&self, source_session: Uuid, event: TrackEvent) {
        for session in self.sessions.all().await {
            if session.id() != source_session {
                session.push_track_event(event.clone());
            }
        }
    }

    async fn on_add_track(&mut self, track: TrackInfo) {
        tracing::debug!(lobby = %self.lobby_id, "Hub adds track {}", track.track_id());
        if track.purpose() == Purpose::Main {
            self.live.add_track(&track).await;
        }
        self.tracks
            .insert(track.track_id().to_string(), track.clone());
        self.broadcast(track.session_id(), TrackEvent::Add(track))
            .await;
    }

    async fn on_remove_track(&mut self, track: TrackInfo) {
        tracing::debug!(lobby = %self.lobby_id, "Hub removes track {}", track.track_id());
        if track.purpose() == Purpose::Main {
            self.live.remove_track(&track).await;
        }
        self.tracks.remove(track.track_id());
        self.broadcast(track.session_id(), TrackEvent::Remove(track))
            .await;
    }

    async fn on_mute_track(&mut self, info: TrackSdpInfo) {
        if let Some(track) = self
            .tracks
            .values_mut()
            .find(|t| t.sdp.id == info.id)
        {
            track.sdp.mute = info.mute;
        }
        self.broadcast(info.session_id, TrackEvent::Mute(info)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::mocks::{MockLiveSender, test_session, test_track};
    use crate::lobby::session::SessionHandle;
    use tokio::sync::broadcast;

    struct Fixture {
        hub: Hub,
        sessions: Arc<SessionRepository>,
        live: Arc<MockLiveSender>,
        quit: CancellationToken,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionRepository::new());
        let live = Arc::new(MockLiveSender::default());
        let quit = CancellationToken::new();
        let hub = Hub::spawn(
            Uuid::new_v4(),
            sessions.clone(),
            live.clone(),
            quit.clone(),
            &TaskTracker::new(),
            Duration::from_secs(1),
        );
        Fixture {
            hub,
            sessions,
            live,
            quit,
        }
    }

    #[tokio::test]
    async fn track_list_skips_own_tracks() {
        let f = fixture();
        let publisher = Uuid::new_v4();
        f.hub
            .dispatch_add_track(test_track(publisher, "a", Purpose::Guest))
            .await;
        f.hub
            .dispatch_add_track(test_track(Uuid::new_v4(), "b", Purpose::Guest))
            .await;

        let tracks = f.hub.track_list(publisher).await;
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), "b");
        assert_eq!(f.hub.track_list(Uuid::new_v4()).await.len(), 2);
    }

    #[tokio::test]
    async fn fans_out_to_other_sessions() {
        let f = fixture();
        let (publisher, mut publisher_events) = test_session();
        let (subscriber, mut subscriber_events) = test_session();
        f.sessions.add(publisher.clone()).await;
        f.sessions.add(subscriber.clone()).await;

        f.hub
            .dispatch_add_track(test_track(publisher.id(), "cam", Purpose::Main))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(1), subscriber_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TrackEvent::Add(t) if t.track_id() == "cam"));
        assert!(publisher_events.try_recv().is_err());
        assert_eq!(f.live.tracks().await, vec!["cam".to_string()]);
    }

    #[tokio::test]
    async fn stalled_session_loses_oldest_events() {
        let f = fixture();
        let (stalled, mut stalled_events) = SessionHandle::detached(Uuid::new_v4(), 1);
        let (subscriber, mut subscriber_events) = test_session();
        f.sessions.add(stalled).await;
        f.sessions.add(subscriber).await;

        let publisher = Uuid::new_v4();
        for id in ["a", "b", "c"] {
            f.hub
                .dispatch_add_track(test_track(publisher, id, Purpose::Guest))
                .await;
        }
        // the track list is answered after all adds went out
        assert_eq!(f.hub.track_list(Uuid::new_v4()).await.len(), 3);

        for id in ["a", "b", "c"] {
            let event = subscriber_events.try_recv().unwrap();
            assert!(matches!(event, TrackEvent::Add(t) if t.track_id() == id));
        }
        assert!(matches!(
            stalled_events.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(2))
        ));
        let event = stalled_events.try_recv().unwrap();
        assert!(matches!(event, TrackEvent::Add(t) if t.track_id() == "c"));
    }

    #[tokio::test]
    async fn removes_tracks_from_live_sender() {
        let f = fixture();
        let track = test_track(Uuid::new_v4(), "cam", Purpose::Main);
        f.hub.dispatch_add_track(track.clone()).await;
        f.hub.dispatch_remove_track(track).await;
        assert!(f.hub.track_list(Uuid::new_v4()).await.is_empty());
        assert!(f.live.tracks().await.is_empty());
    }

    #[tokio::test]
    async fn stopped_hub_answers_with_empty_list() {
        let f = fixture();
        f.quit.cancel();
        assert!(f.hub.track_list(Uuid::new_v4()).await.is_empty());
    }
}
