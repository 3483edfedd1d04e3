use super::config::LobbyConfig;
use super::error::{LobbyError, Result};
use super::handlers::{LostConnection, ReceiverHandler, SenderHandler};
use super::hub::{Hub, TrackEvent};
use super::signal::Signal;
use crate::rtp::{EndpointOptions, RtpEndpoint, RtpEngine, RtpError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const SESSION_QUEUE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub has_receiver: bool,
    pub has_sender: bool,
    pub has_messenger: bool,
}

pub(crate) enum SessionCommand {
    Offer {
        offer: RTCSessionDescription,
        reply: oneshot::Sender<Result<RTCSessionDescription>>,
    },
    Start {
        reply: oneshot::Sender<Result<RTCSessionDescription>>,
    },
    Answer {
        answer: RTCSessionDescription,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Result<SessionStatus>>,
    },
}

/// Handle to a running session actor
#[derive(Clone)]
pub(crate) struct SessionHandle {
    id: Uuid,
    user: Uuid,
    requests: mpsc::Sender<SessionCommand>,
    tracks: broadcast::Sender<TrackEvent>,
    quit: CancellationToken,
    stopped: Arc<AtomicBool>,
    tasks: TaskTracker,
    timeout: Duration,
    #[cfg(test)]
    signal: Arc<Signal>,
}

pub(crate) struct SessionParams {
    pub(crate) user: Uuid,
    pub(crate) live_stream_id: Uuid,
    pub(crate) engine: Arc<dyn RtpEngine>,
    pub(crate) hub: Hub,
    pub(crate) lost: mpsc::UnboundedSender<Uuid>,
    pub(crate) config: LobbyConfig,
}

struct Session {
    id: Uuid,
    live_stream_id: Uuid,
    engine: Arc<dyn RtpEngine>,
    hub: Hub,
    signal: Arc<Signal>,
    lost: LostConnection,
    ingress: Option<Arc<dyn RtpEndpoint>>,
    egress: Option<Arc<dyn RtpEndpoint>>,
    quit: CancellationToken,
    ice_gathering_timeout: Duration,
}

impl SessionHandle {
    /// Starts the actor of a new session.
    pub(crate) fn spawn(params: SessionParams, parent: &CancellationToken) -> Self {
        let id = Uuid::new_v4();
        let quit = parent.child_token();
        let (requests, requests_rx) = mpsc::channel(SESSION_QUEUE_SIZE);
        let (tracks, tracks_rx) = broadcast::channel(params.config.hub_queue_capacity.max(1));

        let signal = Signal::new(
            id,
            params.hub.clone(),
            quit.clone(),
            params.config.messenger_timeout,
        );
        let session = Session {
            id,
            live_stream_id: params.live_stream_id,
            engine: params.engine,
            hub: params.hub,
            signal: Arc::clone(&signal),
            lost: LostConnection::new(id, params.lost),
            ingress: None,
            egress: None,
            quit: quit.clone(),
            ice_gathering_timeout: params.config.ice_gathering_timeout,
        };

        let tasks = TaskTracker::new();
        tasks.spawn(session.run(requests_rx, tracks_rx));
        tasks.close();

        tracing::info!(session = %id, user = %params.user, "Session created");
        Self {
            id,
            user: params.user,
            requests,
            tracks,
            quit,
            stopped: Arc::new(AtomicBool::new(false)),
            tasks,
            timeout: params.config.session_request_timeout,
            #[cfg(test)]
            signal,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(user: Uuid, capacity: usize) -> (Self, broadcast::Receiver<TrackEvent>) {
        let id = Uuid::new_v4();
        let quit = CancellationToken::new();
        let (requests, _) = mpsc::channel(1);
        let (tracks, tracks_rx) = broadcast::channel(capacity);
        let signal = Signal::new(
            id,
            super::mocks::test_hub(),
            quit.clone(),
            Duration::from_secs(1),
        );
        let handle = Self {
            id,
            user,
            requests,
            tracks,
            quit,
            stopped: Arc::new(AtomicBool::new(false)),
            tasks: TaskTracker::new(),
            timeout: Duration::from_secs(1),
            signal,
        };
        (handle, tracks_rx)
    }

    #[cfg(test)]
    pub(crate) fn signal(&self) -> &Arc<Signal> {
        &self.signal
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn user(&self) -> Uuid {
        self.user
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Queues a track event without waiting. Never blocks the hub; when the
    /// queue is full the oldest event is dropped.
    pub(crate) fn push_track_event(&self, event: TrackEvent) {
        if self.tracks.send(event).is_err() {
            tracing::debug!(session = %self.id, "Session no longer receives track events");
        }
    }

    pub(crate) async fn offer(
        &self,
        cancel: &CancellationToken,
        offer: RTCSessionDescription,
    ) -> Result<RTCSessionDescription> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, SessionCommand::Offer { offer, reply }, rx)
            .await
    }

    pub(crate) async fn start(&self, cancel: &CancellationToken) -> Result<RTCSessionDescription> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, SessionCommand::Start { reply }, rx).await
    }

    pub(crate) async fn answer(
        &self,
        cancel: &CancellationToken,
        answer: RTCSessionDescription,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, SessionCommand::Answer { answer, reply }, rx)
            .await
    }

    pub(crate) async fn status(&self, cancel: &CancellationToken) -> Result<SessionStatus> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, SessionCommand::Status { reply }, rx)
            .await
    }

    async fn request<T>(
        &self,
        cancel: &CancellationToken,
        command: SessionCommand,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        if self.quit.is_cancelled() {
            return Err(LobbyError::AlreadyClosed);
        }
        tokio::select! {
            sent = self.requests.send(command) => sent.map_err(|_| LobbyError::AlreadyClosed)?,
            _ = self.quit.cancelled() => return Err(LobbyError::AlreadyClosed),
            _ = cancel.cancelled() => return Err(LobbyError::RequestTimeout),
            _ = tokio::time::sleep(self.timeout) => {
                tracing::error!(session = %self.id, "Session request timed out");
                return Err(LobbyError::RequestTimeout);
            }
        }

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(LobbyError::AlreadyClosed)),
            _ = self.quit.cancelled() => Err(LobbyError::AlreadyClosed),
            _ = cancel.cancelled() => Err(LobbyError::RequestTimeout),
        }
    }

    /// Stops the session and waits until its endpoints are closed. A second
    /// stop fails with `AlreadyClosed`.
    pub(crate) async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(LobbyError::AlreadyClosed);
        }
        self.quit.cancel();
        self.tasks.wait().await;
        Ok(())
    }
}

impl Session {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<SessionCommand>,
        mut tracks: broadcast::Receiver<TrackEvent>,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => break,
                command = requests.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                event = tracks.recv() => match event {
                    Ok(event) => self.on_track_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(session = %self.id, "Dropped {} track events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Offer { offer, reply } => {
                let _ = reply.send(self.on_offer(offer).await);
            }
            SessionCommand::Start { reply } => {
                let _ = reply.send(self.on_start().await);
            }
            SessionCommand::Answer { answer, reply } => {
                let _ = reply.send(self.on_answer(answer).await);
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(Ok(SessionStatus {
                    has_receiver: self.ingress.is_some(),
                    has_sender: self.egress.is_some(),
                    has_messenger: self.signal.has_messenger(),
                }));
            }
        }
    }

    async fn local_description(
        &self,
        endpoint: &Arc<dyn RtpEndpoint>,
    ) -> Result<RTCSessionDescription> {
        let cancel = self.quit.child_token();
        match tokio::time::timeout(
            self.ice_gathering_timeout,
            endpoint.local_description(&cancel),
        )
        .await
        {
            Ok(result) => result.map_err(LobbyError::from),
            Err(_) => Err(LobbyError::Rtp(RtpError::IceGatheringInterrupted)),
        }
    }

    async fn on_offer(&mut self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        if self.ingress.is_some() {
            return Err(LobbyError::AlreadyExists("receiver"));
        }

        let options = EndpointOptions::new()
            .dispatcher(Arc::new(self.hub.clone()))
            .handler(ReceiverHandler::new(&self.signal, self.lost.clone()));
        let endpoint = self
            .engine
            .establish_ingress_endpoint(&self.quit, self.id, self.live_stream_id, offer, options)
            .await?;

        let answer = match self.local_description(&endpoint).await {
            Ok(answer) => answer,
            Err(e) => {
                endpoint.close().await;
                return Err(e);
            }
        };
        endpoint.set_init_complete();
        self.signal.set_ingress_endpoint(Arc::clone(&endpoint)).await;
        self.ingress = Some(endpoint);

        tracing::debug!(session = %self.id, "Receiver attached");
        Ok(answer)
    }

    async fn on_start(&mut self) -> Result<RTCSessionDescription> {
        if self.egress.is_some() {
            return Err(LobbyError::AlreadyExists("sender"));
        }
        if self.ingress.is_none() {
            return Err(LobbyError::ReceiverHasNoMessenger);
        }
        self.signal.wait_for_messenger(&self.quit).await?;
        // the wait may have outlasted a concurrent teardown
        if self.quit.is_cancelled() {
            return Err(LobbyError::AlreadyClosed);
        }

        let options = EndpointOptions::new()
            .handler(SenderHandler::new(&self.signal, self.lost.clone()))
            .track_source(self.hub.track_source(self.id))
            .data_channel();
        let endpoint = self
            .engine
            .establish_egress_endpoint(&self.quit, self.id, self.live_stream_id, options)
            .await?;

        let offer = match self.local_description(&endpoint).await {
            Ok(offer) => offer,
            Err(e) => {
                endpoint.close().await;
                return Err(e);
            }
        };
        self.signal.add_egress_endpoint(Arc::clone(&endpoint)).await;
        self.egress = Some(endpoint);

        tracing::debug!(session = %self.id, "Sender attached");
        Ok(offer)
    }

    async fn on_answer(&mut self, answer: RTCSessionDescription) -> Result<()> {
        if self.egress.is_none() {
            return Err(LobbyError::NoSenderInSession);
        }
        // the HTTP answer always belongs to the first offer of the sender
        if !self.signal.on_egress_answer(answer, 0).await? {
            tracing::debug!(session = %self.id, "Answer was not applied");
        }
        Ok(())
    }

    async fn on_track_event(&mut self, event: TrackEvent) {
        let Some(egress) = self.egress.clone() else {
            return;
        };
        match event {
            TrackEvent::Add(track) => {
                if let Err(e) = egress.add_track(&track).await {
                    tracing::warn!(session = %self.id, "Adding track {} failed: {}", track.track_id(), e);
                }
            }
            TrackEvent::Remove(track) => {
                if let Err(e) = egress.remove_track(&track).await {
                    tracing::warn!(session = %self.id, "Removing track {} failed: {}", track.track_id(), e);
                }
            }
            TrackEvent::Mute(info) => {
                if let Some(egress_info) = egress.set_egress_mute(info.id, info.mute).await {
                    self.signal
                        .send_mute(egress_info.egress_mid, egress_info.mute)
                        .await;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(egress) = self.egress.take() {
            egress.close().await;
        }
        if let Some(ingress) = self.ingress.take() {
            ingress.close().await;
        }
        self.signal.release_endpoints().await;
        tracing::info!(session = %self.id, "Session stopped");
    }
}
