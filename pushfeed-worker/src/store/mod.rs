use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::schedule::PollState;
use crate::types::{ActorRecord, CachedResource, EventAttributes, RepositoryRecord};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Key of the single poll state record.
pub const POLL_STATE_KEY: &str = "github_events:poll_state:public_events";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("poll state could not be serialized: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl StoreError {
    pub fn query(command: &str, error: sqlx::Error) -> Self {
        StoreError::QueryError {
            command: command.to_owned(),
            error,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for resolved resources and push events. Every write is an
/// insert-or-update keyed on the upstream identifier.
#[async_trait]
pub trait Store: Send + Sync {
    async fn cached_actors(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>>;

    async fn upsert_actors(&self, actors: &[ActorRecord]) -> StoreResult<()>;

    /// Internal id of every stored actor among `github_ids`, keyed by github id.
    async fn actor_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>>;

    async fn cached_repositories(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>>;

    async fn upsert_repositories(&self, repositories: &[RepositoryRecord]) -> StoreResult<()>;

    async fn repository_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>>;

    async fn upsert_events(&self, events: &[EventAttributes]) -> StoreResult<()>;
}

/// Persistence for the poll state, read at the start of a cycle and written at its end.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self) -> StoreResult<PollState>;

    async fn write_state(&self, state: &PollState) -> StoreResult<()>;
}
