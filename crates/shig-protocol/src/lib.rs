//! Shig Protocol
//!
//! Wire types shared between the SFU and its clients: the signaling messages
//! exchanged over the data channel and the JSON payloads of the HTTP API.

mod messages;
mod types;

pub use messages::{ChannelMessage, SignalMessage};
pub use types::{LiveStreamInfo, LobbyStatus, Purpose, PurposeError};
