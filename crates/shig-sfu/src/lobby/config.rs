use std::time::Duration;

/// Timeouts and queue sizes of the lobby actors
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a caller waits for the lobby to accept a request
    pub request_timeout: Duration,
    /// How long a caller waits for a session to accept a request
    pub session_request_timeout: Duration,
    pub ice_gathering_timeout: Duration,
    /// How long `Start` waits for the publisher's data channel
    pub messenger_timeout: Duration,
    /// Track events buffered per session before the oldest are dropped
    pub hub_queue_capacity: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            session_request_timeout: Duration::from_secs(5),
            ice_gathering_timeout: Duration::from_secs(5),
            messenger_timeout: Duration::from_secs(10),
            hub_queue_capacity: 64,
        }
    }
}
