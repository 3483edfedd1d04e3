use serde::{Deserialize, Serialize};

/// Envelope for everything sent over the signaling data channel.
///
/// `id` is assigned by the sending side and only used for correlation in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: u32,
    #[serde(flatten)]
    pub body: SignalMessage,
}

/// Signaling messages carried by the data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    /// SDP offer, numbered by the side that created it
    Offer { number: u32, sdp: String },

    /// SDP answer to the offer with the same number
    Answer { number: u32, sdp: String },

    /// A media section was muted or unmuted
    Mute { mid: String, mute: bool },
}

impl ChannelMessage {
    pub fn new(id: u32, body: SignalMessage) -> Self {
        Self { id, body }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_is_tagged_and_flattened() {
        let msg = ChannelMessage::new(
            7,
            SignalMessage::Offer {
                number: 3,
                sdp: "v=0".to_string(),
            },
        );

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "type": "offer", "number": 3, "sdp": "v=0"})
        );
    }

    #[test]
    fn parses_client_answer() {
        let raw = br#"{"id":1,"type":"answer","number":4,"sdp":"v=0"}"#;
        let msg = ChannelMessage::from_slice(raw).unwrap();
        assert_eq!(
            msg.body,
            SignalMessage::Answer {
                number: 4,
                sdp: "v=0".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let raw = br#"{"id":1,"type":"bye"}"#;
        assert!(ChannelMessage::from_slice(raw).is_err());
    }
}
