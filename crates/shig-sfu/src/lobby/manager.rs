use super::error::{LobbyError, Result};
use super::lobby::{JoinResponse, LobbyHandle, StartListenResponse};
use super::repository::LobbyRepository;
use shig_protocol::{LiveStreamInfo, LobbyStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Entry point of the HTTP layer into the lobbies.
///
/// Publishing creates a lobby on demand; every other operation needs a
/// running lobby and fails with `LobbyNotActive` otherwise.
pub struct LobbyManager {
    lobbies: Arc<LobbyRepository>,
}

/// A lobby that stops while a request is on its way counts as not active.
fn closed_as_inactive(e: LobbyError) -> LobbyError {
    match e {
        LobbyError::AlreadyClosed | LobbyError::LobbyStopped => LobbyError::LobbyNotActive,
        other => other,
    }
}

impl LobbyManager {
    pub fn new(lobbies: Arc<LobbyRepository>) -> Self {
        Self { lobbies }
    }

    pub fn lobbies(&self) -> &Arc<LobbyRepository> {
        &self.lobbies
    }

    async fn active_lobby(&self, live_stream_id: Uuid) -> Result<LobbyHandle> {
        self.lobbies
            .get_lobby(live_stream_id)
            .await
            .ok_or(LobbyError::LobbyNotActive)
    }

    pub async fn access_lobby(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
        offer: RTCSessionDescription,
    ) -> Result<JoinResponse> {
        let lobby = self.lobbies.get_or_create_lobby(live_stream_id).await?;
        lobby.join(cancel, user, offer).await
    }

    pub async fn start_listen_lobby(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
    ) -> Result<StartListenResponse> {
        let lobby = self.active_lobby(live_stream_id).await?;
        lobby
            .start_listen(cancel, user)
            .await
            .map_err(closed_as_inactive)
    }

    pub async fn listen_lobby(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
        answer: RTCSessionDescription,
    ) -> Result<Uuid> {
        let lobby = self.active_lobby(live_stream_id).await?;
        lobby
            .listen(cancel, user, answer)
            .await
            .map_err(closed_as_inactive)
    }

    pub async fn leave_lobby(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
    ) -> Result<()> {
        let lobby = self.active_lobby(live_stream_id).await?;
        lobby
            .leave(cancel, user)
            .await
            .map_err(closed_as_inactive)
    }

    pub async fn start_live_stream(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
        info: LiveStreamInfo,
    ) -> Result<()> {
        let lobby = self.active_lobby(live_stream_id).await?;
        lobby
            .start_live(cancel, user, info)
            .await
            .map_err(closed_as_inactive)?;
        self.lobbies.set_lobby_live(live_stream_id, true).await?;
        Ok(())
    }

    pub async fn stop_live_stream(
        &self,
        cancel: &CancellationToken,
        live_stream_id: Uuid,
        user: Uuid,
    ) -> Result<()> {
        let lobby = self.active_lobby(live_stream_id).await?;
        lobby
            .stop_live(cancel, user)
            .await
            .map_err(closed_as_inactive)?;
        self.lobbies.set_lobby_live(live_stream_id, false).await?;
        Ok(())
    }

    pub async fn lobby_status(&self, live_stream_id: Uuid) -> Result<LobbyStatus> {
        let lobby = self.active_lobby(live_stream_id).await?;
        let entity = self
            .lobbies
            .entity(live_stream_id)
            .await
            .ok_or(LobbyError::LobbyNotActive)?;
        Ok(LobbyStatus {
            live_stream_id,
            lobby_id: entity.uuid,
            is_running: entity.is_running,
            is_live: entity.is_live,
            sessions: lobby.session_count().await,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::config::LobbyConfig;
    use crate::lobby::mocks::{MockEngine, MockLiveSender};
    use crate::rtp::LiveStreamSender;
    use crate::rtp::sdp_fixtures::publisher_offer;
    use crate::storage::{LobbyStore, MemoryLobbyStore};

    fn manager() -> LobbyManager {
        LobbyManager::new(LobbyRepository::new(
            Arc::new(MockEngine::default()),
            Arc::new(MemoryLobbyStore::new()),
            Arc::new(|| Arc::new(MockLiveSender::default()) as Arc<dyn LiveStreamSender>),
            LobbyConfig::default(),
        ))
    }

    #[tokio::test]
    async fn failed_first_join_removes_lobby() {
        let store = Arc::new(MemoryLobbyStore::new());
        let manager = LobbyManager::new(LobbyRepository::new(
            Arc::new(MockEngine::default()),
            store.clone(),
            Arc::new(|| Arc::new(MockLiveSender::default()) as Arc<dyn LiveStreamSender>),
            LobbyConfig::default(),
        ));
        let stream = Uuid::new_v4();
        let invalid: RTCSessionDescription =
            serde_json::from_value(serde_json::json!({"type": "offer", "sdp": "not sdp"}))
                .unwrap();

        let result = manager
            .access_lobby(&CancellationToken::new(), stream, Uuid::new_v4(), invalid)
            .await;
        assert!(matches!(result, Err(LobbyError::InvalidSdp(_))));

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while !manager.lobbies().is_empty().await {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            manager.lobby_status(stream).await,
            Err(LobbyError::LobbyNotActive)
        ));
        let entity = store.find(stream).await.unwrap().unwrap();
        assert!(!entity.is_running);
    }

    #[tokio::test]
    async fn listening_needs_active_lobby() {
        let manager = manager();
        let cancel = CancellationToken::new();
        let stream = Uuid::new_v4();

        assert!(matches!(
            manager.start_listen_lobby(&cancel, stream, Uuid::new_v4()).await,
            Err(LobbyError::LobbyNotActive)
        ));
        assert!(matches!(
            manager.leave_lobby(&cancel, stream, Uuid::new_v4()).await,
            Err(LobbyError::LobbyNotActive)
        ));
        assert!(matches!(
            manager.lobby_status(stream).await,
            Err(LobbyError::LobbyNotActive)
        ));
        assert!(manager.lobbies().get_lobby(stream).await.is_none());
    }

    #[tokio::test]
    async fn live_stream_flag_follows_requests() {
        let manager = manager();
        let cancel = CancellationToken::new();
        let stream = Uuid::new_v4();
        let user = Uuid::new_v4();

        let joined = manager
            .access_lobby(&cancel, stream, user, publisher_offer())
            .await
            .unwrap();
        let status = manager.lobby_status(stream).await.unwrap();
        assert!(status.is_running);
        assert!(!status.is_live);
        assert_eq!(status.sessions, 1);

        let info = LiveStreamInfo {
            stream_key: "key".to_string(),
            rtmp_url: "rtmp://localhost/live".to_string(),
        };
        manager
            .start_live_stream(&cancel, stream, user, info)
            .await
            .unwrap();
        assert!(manager.lobby_status(stream).await.unwrap().is_live);

        manager.stop_live_stream(&cancel, stream, user).await.unwrap();
        assert!(!manager.lobby_status(stream).await.unwrap().is_live);

        let lobby = manager.lobbies().get_lobby(stream).await.unwrap();
        assert_eq!(joined.resource, lobby.resource_id());
    }
}
