use super::error::{LobbyError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use shig_protocol::{ChannelMessage, SignalMessage};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;

/// Where signaling messages are written to
#[async_trait]
pub trait SignalTransport: Send + Sync {
    async fn send(&self, data: Bytes) -> Result<()>;
    fn label(&self) -> String;
}

/// Receives the messages a client sends over the signaling channel
#[async_trait]
pub trait SignalObserver: Send + Sync {
    async fn on_offer(&self, number: u32, sdp: String);
    async fn on_answer(&self, number: u32, sdp: String);
    async fn on_mute(&self, mid: String, mute: bool);
}

pub struct DataChannelTransport {
    channel: Arc<RTCDataChannel>,
}

impl DataChannelTransport {
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl SignalTransport for DataChannelTransport {
    async fn send(&self, data: Bytes) -> Result<()> {
        self.channel
            .send(&data)
            .await
            .map_err(|e| LobbyError::Channel(e.to_string()))?;
        Ok(())
    }

    fn label(&self) -> String {
        self.channel.label().to_string()
    }
}

/// JSON signaling on top of a data channel
pub struct Messenger {
    transport: Arc<dyn SignalTransport>,
    next_id: AtomicU32,
    observers: RwLock<Vec<Weak<dyn SignalObserver>>>,
}

impl Messenger {
    pub fn new(transport: Arc<dyn SignalTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            next_id: AtomicU32::new(0),
            observers: RwLock::new(Vec::new()),
        })
    }

    /// Builds a messenger on a data channel and routes the channel's inbound
    /// messages to it.
    pub fn attach(channel: Arc<RTCDataChannel>) -> Arc<Self> {
        let messenger = Self::new(Arc::new(DataChannelTransport::new(Arc::clone(&channel))));
        let weak = Arc::downgrade(&messenger);
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(messenger) = weak.upgrade() {
                    messenger.on_message(&msg.data).await;
                }
            })
        }));
        messenger
    }

    pub async fn register(&self, observer: Weak<dyn SignalObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn send_offer(&self, sdp: String, number: u32) -> Result<()> {
        self.send(SignalMessage::Offer { number, sdp }).await
    }

    pub async fn send_answer(&self, sdp: String, number: u32) -> Result<()> {
        self.send(SignalMessage::Answer { number, sdp }).await
    }

    pub async fn send_mute(&self, mid: String, mute: bool) -> Result<()> {
        self.send(SignalMessage::Mute { mid, mute }).await
    }

    async fn send(&self, body: SignalMessage) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let data = ChannelMessage::new(id, body).to_vec()?;
        self.transport.send(Bytes::from(data)).await
    }

    pub async fn on_message(&self, data: &[u8]) {
        let msg = match ChannelMessage::from_slice(data) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(
                    "Dropping malformed message on '{}': {}",
                    self.transport.label(),
                    e
                );
                return;
            }
        };

        let observers: Vec<_> = self
            .observers
            .read()
            .await
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        for observer in observers {
            match msg.body.clone() {
                SignalMessage::Offer { number, sdp } => observer.on_offer(number, sdp).await,
                SignalMessage::Answer { number, sdp } => observer.on_answer(number, sdp).await,
                SignalMessage::Mute { mid, mute } => observer.on_mute(mid, mute).await,
            }
        }
    }
}
