use crate::lobby::{LobbyConfig, LobbyManager};
use crate::rtp::{LiveForwardConfig, RtpConfig};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_address: String,
    /// SQLite URL; empty keeps lobby state in memory
    #[serde(default)]
    pub database_url: String,
    pub jwt_secret: String,
    #[serde(default)]
    pub rtp: RtpConfig,
    #[serde(default)]
    pub live: LiveForwardConfig,
    /// Actor timeouts in seconds
    pub lobby_request_timeout: u64,
    pub session_request_timeout: u64,
    pub ice_gathering_timeout: u64,
    pub messenger_timeout: u64,
    pub hub_queue_capacity: usize,
}

impl Config {
    /// Reads `config/sfu.toml` (optional) and `SHIG_*` environment variables
    /// on top of the defaults. Nested keys use `__`, e.g.
    /// `SHIG_RTP__STATS_INTERVAL_SECS`.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let lobby = LobbyConfig::default();
        let settings = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("database_url", "")?
            .set_default("jwt_secret", DEV_JWT_SECRET)?
            .set_default("lobby_request_timeout", lobby.request_timeout.as_secs())?
            .set_default(
                "session_request_timeout",
                lobby.session_request_timeout.as_secs(),
            )?
            .set_default("ice_gathering_timeout", lobby.ice_gathering_timeout.as_secs())?
            .set_default("messenger_timeout", lobby.messenger_timeout.as_secs())?
            .set_default("hub_queue_capacity", lobby.hub_queue_capacity as u64)?
            .add_source(config::File::with_name("config/sfu").required(false))
            .add_source(
                config::Environment::with_prefix("SHIG")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        if config.jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("SHIG_JWT_SECRET not set, using default (insecure for production!)");
        }
        config.rtp.validate()?;
        Ok(config)
    }

    pub fn lobby_config(&self) -> LobbyConfig {
        LobbyConfig {
            request_timeout: Duration::from_secs(self.lobby_request_timeout),
            session_request_timeout: Duration::from_secs(self.session_request_timeout),
            ice_gathering_timeout: Duration::from_secs(self.ice_gathering_timeout),
            messenger_timeout: Duration::from_secs(self.messenger_timeout),
            hub_queue_capacity: self.hub_queue_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let lobby = LobbyConfig::default();
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            database_url: String::new(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            rtp: RtpConfig::default(),
            live: LiveForwardConfig::default(),
            lobby_request_timeout: lobby.request_timeout.as_secs(),
            session_request_timeout: lobby.session_request_timeout.as_secs(),
            ice_gathering_timeout: lobby.ice_gathering_timeout.as_secs(),
            messenger_timeout: lobby.messenger_timeout.as_secs(),
            hub_queue_capacity: lobby.hub_queue_capacity,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub manager: Arc<LobbyManager>,
}

impl AppState {
    pub fn new(config: Config, manager: Arc<LobbyManager>) -> Self {
        Self { config, manager }
    }
}
