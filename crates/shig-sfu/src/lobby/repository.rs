use super::config::LobbyConfig;
use super::error::Result;
use super::lobby::LobbyHandle;
use crate::rtp::{LiveStreamSender, RtpEngine};
use crate::storage::{LobbyEntity, LobbyStore};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Builds the live stream sender of a new lobby
pub type LiveSenderFactory = Arc<dyn Fn() -> Arc<dyn LiveStreamSender> + Send + Sync>;

struct RunningLobby {
    handle: LobbyHandle,
    entity: LobbyEntity,
}

/// Running lobbies keyed by live stream id.
///
/// Lobbies are created on first access. A lobby whose last session is gone
/// removes itself.
pub struct LobbyRepository {
    lobbies: RwLock<HashMap<Uuid, RunningLobby>>,
    engine: Arc<dyn RtpEngine>,
    store: Arc<dyn LobbyStore>,
    live_sender: LiveSenderFactory,
    config: LobbyConfig,
    empty: mpsc::UnboundedSender<Uuid>,
}

impl LobbyRepository {
    pub fn new(
        engine: Arc<dyn RtpEngine>,
        store: Arc<dyn LobbyStore>,
        live_sender: LiveSenderFactory,
        config: LobbyConfig,
    ) -> Arc<Self> {
        let (empty, empty_rx) = mpsc::unbounded_channel();
        let repo = Arc::new(Self {
            lobbies: RwLock::new(HashMap::new()),
            engine,
            store,
            live_sender,
            config,
            empty,
        });
        tokio::spawn(collect_empty_lobbies(Arc::downgrade(&repo), empty_rx));
        repo
    }

    pub async fn get_or_create_lobby(&self, id: Uuid) -> Result<LobbyHandle> {
        if let Some(lobby) = self.lobbies.read().await.get(&id) {
            return Ok(lobby.handle.clone());
        }

        let mut lobbies = self.lobbies.write().await;
        if let Some(lobby) = lobbies.get(&id) {
            return Ok(lobby.handle.clone());
        }

        let mut entity = self.store.load_or_create(id).await?;
        entity.is_running = true;
        let entity = self.store.save(&entity).await?;

        let handle = LobbyHandle::spawn(
            id,
            Arc::clone(&self.engine),
            (self.live_sender)(),
            self.empty.clone(),
            self.config.clone(),
        );
        lobbies.insert(
            id,
            RunningLobby {
                handle: handle.clone(),
                entity,
            },
        );
        Ok(handle)
    }

    pub async fn get_lobby(&self, id: Uuid) -> Option<LobbyHandle> {
        self.lobbies.read().await.get(&id).map(|l| l.handle.clone())
    }

    pub async fn entity(&self, id: Uuid) -> Option<LobbyEntity> {
        self.lobbies.read().await.get(&id).map(|l| l.entity.clone())
    }

    /// Persists the live flag of a running lobby. Returns `false` if the
    /// lobby is not running.
    pub async fn set_lobby_live(&self, id: Uuid, is_live: bool) -> Result<bool> {
        let mut lobbies = self.lobbies.write().await;
        let Some(lobby) = lobbies.get_mut(&id) else {
            return Ok(false);
        };
        lobby.entity.is_live = is_live;
        lobby.entity = self.store.save(&lobby.entity).await?;
        Ok(true)
    }

    /// Removes and stops a lobby that has no sessions left. Returns whether
    /// the lobby was removed.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = {
            let mut lobbies = self.lobbies.write().await;
            match lobbies.get(&id) {
                Some(lobby) if lobby.handle.session_count().await == 0 => lobbies.remove(&id),
                _ => None,
            }
        };
        let Some(mut lobby) = removed else {
            return Ok(false);
        };

        if let Err(e) = lobby.handle.stop().await {
            tracing::warn!(lobby = %id, "Stopping removed lobby: {}", e);
        }
        lobby.entity.is_running = false;
        lobby.entity.is_live = false;
        self.store.save(&lobby.entity).await?;
        tracing::info!(lobby = %id, "Lobby removed");
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.lobbies.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lobbies.read().await.is_empty()
    }
}

async fn collect_empty_lobbies(repo: Weak<LobbyRepository>, mut empty: mpsc::UnboundedReceiver<Uuid>) {
    while let Some(id) = empty.recv().await {
        let Some(repo) = repo.upgrade() else {
            break;
        };
        match repo.delete(id).await {
            Ok(true) => tracing::debug!(lobby = %id, "Collected empty lobby"),
            Ok(false) => {}
            Err(e) => tracing::warn!(lobby = %id, "Collecting empty lobby failed: {}", e),
        }
    }
}
