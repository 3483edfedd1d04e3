use serde::Deserialize;
use thiserror::Error;
use webrtc::ice_transport::ice_server::RTCIceServer;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ice server {0} has no urls")]
    MissingUrls(usize),

    #[error("ice server {index} has unsupported credential type '{kind}'")]
    CredentialType { index: usize, kind: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RtpConfig {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    /// Interval of the per-endpoint stats log; 0 turns it off
    #[serde(default)]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
    #[serde(default)]
    pub credential_type: String,
}

impl RtpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, server) in self.ice_servers.iter().enumerate() {
            if server.urls.is_empty() {
                return Err(ConfigError::MissingUrls(index));
            }
            match server.credential_type.as_str() {
                "" | "password" | "oauth" => {}
                other => {
                    return Err(ConfigError::CredentialType {
                        index,
                        kind: other.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone(),
                credential: server.credential.clone(),
                ..Default::default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stun(urls: &[&str]) -> IceServer {
        IceServer {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn accepts_known_credential_types() {
        let mut turn = stun(&["turn:turn.example.org:3478"]);
        turn.credential_type = "password".to_string();
        let config = RtpConfig {
            ice_servers: vec![stun(&["stun:stun.l.google.com:19302"]), turn],
            stats_interval_secs: 0,
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.rtc_ice_servers().len(), 2);
    }

    #[test]
    fn rejects_server_without_urls() {
        let config = RtpConfig {
            ice_servers: vec![stun(&["stun:a"]), stun(&[])],
            stats_interval_secs: 0,
        };
        assert_eq!(config.validate(), Err(ConfigError::MissingUrls(1)));
    }

    #[test]
    fn rejects_unknown_credential_type() {
        let mut server = stun(&["turn:a"]);
        server.credential_type = "token".to_string();
        let config = RtpConfig {
            ice_servers: vec![server],
            stats_interval_secs: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CredentialType { index: 0, .. })
        ));
    }
}
