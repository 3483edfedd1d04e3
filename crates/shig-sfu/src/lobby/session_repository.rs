use super::session::SessionHandle;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Sessions of one lobby, keyed by session id. At most one per user.
#[derive(Default)]
pub(crate) struct SessionRepository {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds the session unless one with the same id or user exists.
    pub(crate) async fn add(&self, session: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id())
            || sessions.values().any(|s| s.user() == session.user())
        {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    pub(crate) async fn all(&self) -> Vec<SessionHandle> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub(crate) async fn find_by_id(&self, id: Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub(crate) async fn find_by_user_id(&self, user: Uuid) -> Option<SessionHandle> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.user() == user)
            .cloned()
    }

    pub(crate) async fn delete(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub(crate) async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub(crate) async fn drain(&self) -> Vec<SessionHandle> {
        self.sessions.write().await.drain().map(|(_, s)| s).collect()
    }
}
