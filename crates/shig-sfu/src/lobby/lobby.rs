use super::config::LobbyConfig;
use super::error::{LobbyError, Result};
use super::hub::Hub;
use super::session::{SessionHandle, SessionParams};
use super::session_repository::SessionRepository;
use crate::rtp::{LiveStreamSender, RtpEngine};
use futures_util::future::join_all;
use shig_protocol::LiveStreamInfo;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

const LOBBY_QUEUE_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct JoinResponse {
    pub answer: RTCSessionDescription,
    pub resource: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct StartListenResponse {
    pub offer: RTCSessionDescription,
    pub session_id: Uuid,
}

enum LobbyCommand {
    Join {
        user: Uuid,
        offer: RTCSessionDescription,
        reply: oneshot::Sender<Result<JoinResponse>>,
    },
    Leave {
        user: Uuid,
        reply: oneshot::Sender<Result<()>>,
    },
    StartListen {
        user: Uuid,
        reply: oneshot::Sender<Result<StartListenResponse>>,
    },
    Listen {
        user: Uuid,
        answer: RTCSessionDescription,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    StartLive {
        user: Uuid,
        info: LiveStreamInfo,
        reply: oneshot::Sender<Result<()>>,
    },
    StopLive {
        user: Uuid,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct LobbyRequest {
    cancel: CancellationToken,
    command: LobbyCommand,
}

/// Handle to the actor of one live stream's lobby.
///
/// All mutations of the lobby's session set go through the actor's queue and
/// are applied one after another.
#[derive(Clone)]
pub struct LobbyHandle {
    id: Uuid,
    resource_id: Uuid,
    requests: mpsc::Sender<LobbyRequest>,
    sessions: Arc<SessionRepository>,
    quit: CancellationToken,
    stopped: Arc<AtomicBool>,
    tasks: TaskTracker,
    timeout: Duration,
}

struct Lobby {
    id: Uuid,
    resource_id: Uuid,
    engine: Arc<dyn RtpEngine>,
    hub: Hub,
    sessions: Arc<SessionRepository>,
    live: Arc<dyn LiveStreamSender>,
    lost: mpsc::UnboundedSender<Uuid>,
    empty: mpsc::UnboundedSender<Uuid>,
    config: LobbyConfig,
    quit: CancellationToken,
}

impl LobbyHandle {
    /// Starts the lobby actor and its hub. `empty` receives the lobby id
    /// whenever the last session left.
    pub(crate) fn spawn(
        id: Uuid,
        engine: Arc<dyn RtpEngine>,
        live: Arc<dyn LiveStreamSender>,
        empty: mpsc::UnboundedSender<Uuid>,
        config: LobbyConfig,
    ) -> Self {
        let resource_id = Uuid::new_v4();
        let quit = CancellationToken::new();
        let tasks = TaskTracker::new();
        let sessions = Arc::new(SessionRepository::new());
        let (requests, requests_rx) = mpsc::channel(LOBBY_QUEUE_SIZE);
        let (lost, lost_rx) = mpsc::unbounded_channel();

        let hub = Hub::spawn(
            id,
            Arc::clone(&sessions),
            Arc::clone(&live),
            quit.child_token(),
            &tasks,
            config.request_timeout,
        );
        let lobby = Lobby {
            id,
            resource_id,
            engine,
            hub,
            sessions: Arc::clone(&sessions),
            live,
            lost,
            empty,
            config: config.clone(),
            quit: quit.clone(),
        };
        tasks.spawn(lobby.run(requests_rx, lost_rx));
        tasks.close();

        tracing::info!(lobby = %id, resource = %resource_id, "Lobby created");
        Self {
            id,
            resource_id,
            requests,
            sessions,
            quit,
            stopped: Arc::new(AtomicBool::new(false)),
            tasks,
            timeout: config.request_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resource_id(&self) -> Uuid {
        self.resource_id
    }

    pub fn is_stopped(&self) -> bool {
        self.quit.is_cancelled()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    pub async fn has_session(&self, user: Uuid) -> bool {
        self.sessions.find_by_user_id(user).await.is_some()
    }

    /// Publishes the user's media: the offer goes to the user's session,
    /// which is created if needed.
    pub async fn join(
        &self,
        cancel: &CancellationToken,
        user: Uuid,
        offer: RTCSessionDescription,
    ) -> Result<JoinResponse> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::Join { user, offer, reply }, rx)
            .await
    }

    pub async fn leave(&self, cancel: &CancellationToken, user: Uuid) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::Leave { user, reply }, rx)
            .await
    }

    /// First half of subscribing: returns the server's offer for the user's
    /// egress connection.
    pub async fn start_listen(
        &self,
        cancel: &CancellationToken,
        user: Uuid,
    ) -> Result<StartListenResponse> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::StartListen { user, reply }, rx)
            .await
    }

    /// Second half of subscribing: applies the client's answer.
    pub async fn listen(
        &self,
        cancel: &CancellationToken,
        user: Uuid,
        answer: RTCSessionDescription,
    ) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::Listen { user, answer, reply }, rx)
            .await
    }

    pub async fn start_live(
        &self,
        cancel: &CancellationToken,
        user: Uuid,
        info: LiveStreamInfo,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::StartLive { user, info, reply }, rx)
            .await
    }

    pub async fn stop_live(&self, cancel: &CancellationToken, user: Uuid) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.request(cancel, LobbyCommand::StopLive { user, reply }, rx)
            .await
    }

    async fn request<T>(
        &self,
        cancel: &CancellationToken,
        command: LobbyCommand,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        if self.quit.is_cancelled() {
            return Err(LobbyError::AlreadyClosed);
        }
        let request = LobbyRequest {
            cancel: cancel.clone(),
            command,
        };

        tokio::select! {
            sent = self.requests.send(request) => sent.map_err(|_| LobbyError::AlreadyClosed)?,
            _ = self.quit.cancelled() => return Err(LobbyError::AlreadyClosed),
            _ = cancel.cancelled() => return Err(LobbyError::RequestTimeout),
            _ = tokio::time::sleep(self.timeout) => {
                tracing::error!(lobby = %self.id, "Lobby request timed out");
                return Err(LobbyError::RequestTimeout);
            }
        }

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(LobbyError::LobbyStopped)),
            _ = self.quit.cancelled() => Err(LobbyError::LobbyStopped),
            _ = cancel.cancelled() => Err(LobbyError::RequestTimeout),
        }
    }

    /// Stops the lobby with all its sessions and waits for them. A second
    /// stop fails with `AlreadyClosed`.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            tracing::warn!(lobby = %self.id, "Lobby was already stopped");
            return Err(LobbyError::AlreadyClosed);
        }
        self.quit.cancel();
        self.tasks.wait().await;
        Ok(())
    }
}

impl Lobby {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<LobbyRequest>,
        mut lost: mpsc::UnboundedReceiver<Uuid>,
    ) {
        loop {
            tokio::select! {
                _ = self.quit.cancelled() => break,
                request = requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => break,
                },
                Some(session_id) = lost.recv() => self.on_lost_connection(session_id).await,
            }
        }
        self.shutdown().await;
    }

    async fn handle(&mut self, request: LobbyRequest) {
        let cancel = request.cancel;
        // a caller that gave up while queued gets nothing
        if cancel.is_cancelled() {
            return;
        }
        match request.command {
            LobbyCommand::Join { user, offer, reply } => {
                let result = self.on_join(&cancel, user, offer).await;
                let failed = result.is_err();
                let _ = reply.send(result);
                // a lobby created for a failed first join must not linger
                if failed {
                    self.report_if_empty().await;
                }
            }
            LobbyCommand::Leave { user, reply } => {
                let _ = reply.send(self.on_leave(user).await);
                self.report_if_empty().await;
            }
            LobbyCommand::StartListen { user, reply } => {
                let _ = reply.send(self.on_start_listen(&cancel, user).await);
            }
            LobbyCommand::Listen {
                user,
                answer,
                reply,
            } => {
                let _ = reply.send(self.on_listen(&cancel, user, answer).await);
            }
            LobbyCommand::StartLive { user, info, reply } => {
                let _ = reply.send(self.on_start_live(&cancel, user, info).await);
            }
            LobbyCommand::StopLive { user, reply } => {
                let _ = reply.send(self.on_stop_live(user).await);
            }
        }
    }

    fn new_session(&self, user: Uuid) -> SessionHandle {
        SessionHandle::spawn(
            SessionParams {
                user,
                live_stream_id: self.id,
                engine: Arc::clone(&self.engine),
                hub: self.hub.clone(),
                lost: self.lost.clone(),
                config: self.config.clone(),
            },
            &self.quit,
        )
    }

    async fn user_session(&self, user: Uuid) -> Result<SessionHandle> {
        self.sessions
            .find_by_user_id(user)
            .await
            .ok_or(LobbyError::SessionNotFound(user))
    }

    async fn on_join(
        &mut self,
        cancel: &CancellationToken,
        user: Uuid,
        offer: RTCSessionDescription,
    ) -> Result<JoinResponse> {
        tracing::info!(lobby = %self.id, user = %user, "Join");
        let (session, created) = match self.sessions.find_by_user_id(user).await {
            Some(session) => (session, false),
            None => (self.new_session(user), true),
        };

        let result = tokio::select! {
            result = session.offer(cancel, offer) => result,
            _ = self.quit.cancelled() => Err(LobbyError::LobbyStopped),
        };

        match result {
            Ok(answer) => {
                if created && !self.sessions.add(session.clone()).await {
                    let _ = session.stop().await;
                    return Err(LobbyError::AlreadyExists("session"));
                }
                Ok(JoinResponse {
                    answer,
                    resource: self.resource_id,
                    session_id: session.id(),
                })
            }
            Err(e) => {
                if created {
                    let _ = session.stop().await;
                }
                Err(e)
            }
        }
    }

    async fn remove_session(&self, session: &SessionHandle) {
        if let Err(e) = session.stop().await {
            tracing::debug!(lobby = %self.id, session = %session.id(), "Stopping session: {}", e);
        }
        self.sessions.delete(session.id()).await;
    }

    async fn report_if_empty(&self) {
        if self.sessions.len().await == 0 {
            let _ = self.empty.send(self.id);
        }
    }

    async fn on_leave(&mut self, user: Uuid) -> Result<()> {
        tracing::info!(lobby = %self.id, user = %user, "Leave");
        let session = self.user_session(user).await?;
        self.remove_session(&session).await;
        Ok(())
    }

    async fn on_start_listen(
        &mut self,
        cancel: &CancellationToken,
        user: Uuid,
    ) -> Result<StartListenResponse> {
        let session = self.user_session(user).await?;
        let offer = tokio::select! {
            result = session.start(cancel) => result?,
            _ = self.quit.cancelled() => return Err(LobbyError::LobbyStopped),
        };
        Ok(StartListenResponse {
            offer,
            session_id: session.id(),
        })
    }

    async fn on_listen(
        &mut self,
        cancel: &CancellationToken,
        user: Uuid,
        answer: RTCSessionDescription,
    ) -> Result<Uuid> {
        let session = self.user_session(user).await?;
        tokio::select! {
            result = session.answer(cancel, answer) => result?,
            _ = self.quit.cancelled() => return Err(LobbyError::LobbyStopped),
        }
        Ok(session.id())
    }

    async fn on_start_live(
        &mut self,
        cancel: &CancellationToken,
        user: Uuid,
        info: LiveStreamInfo,
    ) -> Result<()> {
        let session = self.user_session(user).await?;
        if !session.status(cancel).await?.has_receiver {
            return Err(LobbyError::NoReceiverInSession);
        }
        self.live.start(&info).await?;
        tracing::info!(lobby = %self.id, "Live stream started");
        Ok(())
    }

    async fn on_stop_live(&mut self, user: Uuid) -> Result<()> {
        self.user_session(user).await?;
        self.live.stop().await;
        tracing::info!(lobby = %self.id, "Live stream stopped");
        Ok(())
    }

    async fn on_lost_connection(&mut self, session_id: Uuid) {
        let Some(session) = self.sessions.find_by_id(session_id).await else {
            return;
        };
        tracing::info!(lobby = %self.id, session = %session_id, "Removing session after connection loss");
        self.remove_session(&session).await;
        self.report_if_empty().await;
    }

    async fn shutdown(&mut self) {
        let sessions = self.sessions.drain().await;
        join_all(sessions.iter().map(|session| session.stop())).await;
        self.live.stop().await;
        tracing::info!(lobby = %self.id, "Lobby stopped");
    }
}
