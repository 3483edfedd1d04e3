//! Lobby and session actors.
//!
//! A lobby owns the sessions of one live stream and a hub that fans the
//! published tracks out to them. Each session owns at most one ingress and
//! one egress endpoint.

mod config;
mod error;
mod handlers;
mod hub;
#[allow(clippy::module_inception)]
mod lobby;
mod manager;
mod messenger;
mod repository;
mod session;
mod session_repository;
mod signal;

#[cfg(test)]
pub(crate) mod mocks;

pub use config::LobbyConfig;
pub use error::{LobbyError, Result};
pub use lobby::{JoinResponse, LobbyHandle, StartListenResponse};
pub use manager::LobbyManager;
pub use messenger::{DataChannelTransport, Messenger, SignalObserver, SignalTransport};
pub use repository::{LiveSenderFactory, LobbyRepository};
pub use session::SessionStatus;
