//! Persistence of lobby metadata

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Stored state of the lobby of one live stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LobbyEntity {
    pub uuid: Uuid,
    pub live_stream_id: Uuid,
    pub is_running: bool,
    pub is_live: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LobbyEntity {
    pub fn new(live_stream_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            live_stream_id,
            is_running: false,
            is_live: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait LobbyStore: Send + Sync {
    async fn find(&self, live_stream_id: Uuid) -> Result<Option<LobbyEntity>>;

    /// Writes the entity and returns it as stored.
    async fn save(&self, entity: &LobbyEntity) -> Result<LobbyEntity>;

    async fn load_or_create(&self, live_stream_id: Uuid) -> Result<LobbyEntity> {
        match self.find(live_stream_id).await? {
            Some(entity) => Ok(entity),
            None => self.save(&LobbyEntity::new(live_stream_id)).await,
        }
    }
}

/// Store used when no database is configured
#[derive(Default)]
pub struct MemoryLobbyStore {
    lobbies: RwLock<HashMap<Uuid, LobbyEntity>>,
}

impl MemoryLobbyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LobbyStore for MemoryLobbyStore {
    async fn find(&self, live_stream_id: Uuid) -> Result<Option<LobbyEntity>> {
        Ok(self.lobbies.read().await.get(&live_stream_id).cloned())
    }

    async fn save(&self, entity: &LobbyEntity) -> Result<LobbyEntity> {
        let mut stored = entity.clone();
        stored.updated_at = Utc::now();
        self.lobbies
            .write()
            .await
            .insert(stored.live_stream_id, stored.clone());
        Ok(stored)
    }
}

pub struct SqliteLobbyStore {
    db: SqlitePool,
}

impl SqliteLobbyStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let mut pool = SqlitePoolOptions::new();
        // every connection to an in-memory database opens a database of its own
        if database_url.contains(":memory:") {
            pool = pool.max_connections(1).idle_timeout(None).max_lifetime(None);
        } else {
            pool = pool.max_connections(5);
        }
        let db = pool.connect_with(options).await?;
        tracing::info!("Database connection pool initialized");

        sqlx::migrate!("./migrations").run(&db).await?;
        tracing::info!("Database migrations completed");
        Ok(Self { db })
    }
}

#[async_trait]
impl LobbyStore for SqliteLobbyStore {
    async fn find(&self, live_stream_id: Uuid) -> Result<Option<LobbyEntity>> {
        let entity = sqlx::query_as::<_, LobbyEntity>(
            r#"
            SELECT uuid, live_stream_id, is_running, is_live, created_at, updated_at
            FROM lobbies WHERE live_stream_id = ?1
            "#,
        )
        .bind(live_stream_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(entity)
    }

    async fn save(&self, entity: &LobbyEntity) -> Result<LobbyEntity> {
        let stored = sqlx::query_as::<_, LobbyEntity>(
            r#"
            INSERT INTO lobbies (uuid, live_stream_id, is_running, is_live, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (live_stream_id) DO UPDATE SET
                is_running = excluded.is_running,
                is_live = excluded.is_live,
                updated_at = excluded.updated_at
            RETURNING uuid, live_stream_id, is_running, is_live, created_at, updated_at
            "#,
        )
        .bind(entity.uuid)
        .bind(entity.live_stream_id)
        .bind(entity.is_running)
        .bind(entity.is_live)
        .bind(entity.created_at)
        .bind(Utc::now())
        .fetch_one(&self.db)
        .await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn LobbyStore) {
        let id = Uuid::new_v4();
        assert!(store.find(id).await.unwrap().is_none());

        let mut entity = store.load_or_create(id).await.unwrap();
        assert_eq!(entity.live_stream_id, id);
        assert!(!entity.is_running);

        entity.is_running = true;
        entity.is_live = true;
        store.save(&entity).await.unwrap();

        let loaded = store.load_or_create(id).await.unwrap();
        assert_eq!(loaded.uuid, entity.uuid);
        assert!(loaded.is_running);
        assert!(loaded.is_live);
    }

    #[tokio::test]
    async fn memory_store() {
        exercise(&MemoryLobbyStore::new()).await;
    }

    #[tokio::test]
    async fn sqlite_store() {
        let store = SqliteLobbyStore::connect("sqlite::memory:").await.unwrap();
        exercise(&store).await;
    }
}
