//! Shig SFU library
//!
//! Exposes the server components for testing and embedding.

pub mod api;
pub mod auth;
pub mod error;
pub mod lobby;
pub mod rtp;
pub mod state;
pub mod storage;

use anyhow::Result;
use lobby::{LiveSenderFactory, LobbyManager, LobbyRepository};
use rtp::{LiveStreamSender, RtpEngine, UdpLiveForwarder};
use std::sync::Arc;
use storage::{LobbyStore, MemoryLobbyStore, SqliteLobbyStore};

/// Create and configure the server application
pub async fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let engine = Arc::new(rtp::Engine::new(&config.rtp)?);
    create_app_with_engine(config, engine).await
}

/// Like [`create_app`], with the given RTP engine
pub async fn create_app_with_engine(
    config: state::Config,
    engine: Arc<dyn RtpEngine>,
) -> Result<(axum::Router, state::AppState)> {
    let store: Arc<dyn LobbyStore> = if config.database_url.is_empty() {
        tracing::info!("No database configured, keeping lobbies in memory");
        Arc::new(MemoryLobbyStore::new())
    } else {
        Arc::new(SqliteLobbyStore::connect(&config.database_url).await?)
    };

    let live = config.live.clone();
    let live_sender: LiveSenderFactory = Arc::new(move || {
        Arc::new(UdpLiveForwarder::new(live.clone())) as Arc<dyn LiveStreamSender>
    });

    let lobbies = LobbyRepository::new(engine, store, live_sender, config.lobby_config());
    let app_state = state::AppState::new(config, Arc::new(LobbyManager::new(lobbies)));
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}
