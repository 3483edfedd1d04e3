use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// What a published track is used for.
///
/// Encoded as a number in the SDP media title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    #[default]
    Guest,
    Main,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown track purpose: {0}")]
pub struct PurposeError(pub String);

impl Purpose {
    pub fn code(self) -> u8 {
        match self {
            Purpose::Guest => 1,
            Purpose::Main => 2,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Purpose {
    type Err = PurposeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Purpose::Guest),
            "2" => Ok(Purpose::Main),
            other => Err(PurposeError(other.to_string())),
        }
    }
}

/// Payload of `POST .../live`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamInfo {
    pub stream_key: String,
    pub rtmp_url: String,
}

/// Response of `GET .../live`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStatus {
    pub live_stream_id: Uuid,
    pub lobby_id: Uuid,
    pub is_running: bool,
    pub is_live: bool,
    pub sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_codes() {
        assert_eq!("1".parse::<Purpose>(), Ok(Purpose::Guest));
        assert_eq!(" 2".parse::<Purpose>(), Ok(Purpose::Main));
        assert!("3".parse::<Purpose>().is_err());
        assert_eq!(Purpose::Main.to_string(), "2");
    }

    #[test]
    fn live_stream_info_uses_camel_case() {
        let info: LiveStreamInfo =
            serde_json::from_str(r#"{"streamKey":"abc","rtmpUrl":"rtmp://host/app"}"#).unwrap();
        assert_eq!(info.stream_key, "abc");
        assert_eq!(info.rtmp_url, "rtmp://host/app");
    }
}
