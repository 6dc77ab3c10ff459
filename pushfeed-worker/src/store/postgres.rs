use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;

use super::{StateStore, Store, StoreError, StoreResult, POLL_STATE_KEY};
use crate::schedule::PollState;
use crate::types::{ActorRecord, CachedResource, EventAttributes, RepositoryRecord};

#[derive(sqlx::FromRow)]
struct CachedRow {
    github_id: i64,
    etag: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<CachedRow> for CachedResource {
    fn from(row: CachedRow) -> Self {
        CachedResource {
            github_id: row.github_id,
            etag: row.etag,
            updated_at: row.updated_at,
        }
    }
}

/// Store backed by the Postgres tables created by the workspace migrations.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn cached(&self, table: &str, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        let query = format!(
            "SELECT github_id, etag, updated_at FROM {table} WHERE github_id = ANY($1)"
        );
        let rows: Vec<CachedRow> = sqlx::query_as(&query)
            .bind(github_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("SELECT", error))?;

        Ok(rows.into_iter().map(CachedResource::from).collect())
    }

    async fn internal_ids(&self, table: &str, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        let query = format!("SELECT github_id, id FROM {table} WHERE github_id = ANY($1)");
        let rows: Vec<(i64, i64)> = sqlx::query_as(&query)
            .bind(github_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::query("SELECT", error))?;

        Ok(rows.into_iter().collect())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn cached_actors(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        self.cached("actors", github_ids).await
    }

    async fn upsert_actors(&self, actors: &[ActorRecord]) -> StoreResult<()> {
        if actors.is_empty() {
            return Ok(());
        }

        let github_ids: Vec<i64> = actors.iter().map(|a| a.github_id).collect();
        let logins: Vec<Option<String>> = actors.iter().map(|a| a.login.clone()).collect();
        let display_logins: Vec<Option<String>> =
            actors.iter().map(|a| a.display_login.clone()).collect();
        let avatar_urls: Vec<Option<String>> =
            actors.iter().map(|a| a.avatar_url.clone()).collect();
        let urls: Vec<String> = actors.iter().map(|a| a.url.clone()).collect();
        let etags: Vec<Option<String>> = actors.iter().map(|a| a.etag.clone()).collect();
        let data: Vec<Value> = actors.iter().map(|a| a.data.clone()).collect();
        let updated_at: Vec<DateTime<Utc>> = actors.iter().map(|a| a.updated_at).collect();

        sqlx::query(
            r#"
INSERT INTO actors (github_id, login, display_login, avatar_url, url, etag, data, created_at, updated_at)
SELECT github_id, login, display_login, avatar_url, url, etag, data, updated_at, updated_at
FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[], $5::text[], $6::text[], $7::jsonb[], $8::timestamptz[])
    AS t(github_id, login, display_login, avatar_url, url, etag, data, updated_at)
ON CONFLICT (github_id) DO UPDATE SET
    login = EXCLUDED.login,
    display_login = EXCLUDED.display_login,
    avatar_url = EXCLUDED.avatar_url,
    url = EXCLUDED.url,
    etag = EXCLUDED.etag,
    data = EXCLUDED.data,
    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&github_ids)
        .bind(&logins)
        .bind(&display_logins)
        .bind(&avatar_urls)
        .bind(&urls)
        .bind(&etags)
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::query("INSERT", error))?;

        Ok(())
    }

    async fn actor_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        self.internal_ids("actors", github_ids).await
    }

    async fn cached_repositories(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        self.cached("repositories", github_ids).await
    }

    async fn upsert_repositories(&self, repositories: &[RepositoryRecord]) -> StoreResult<()> {
        if repositories.is_empty() {
            return Ok(());
        }

        let github_ids: Vec<i64> = repositories.iter().map(|r| r.github_id).collect();
        let names: Vec<Option<String>> = repositories.iter().map(|r| r.name.clone()).collect();
        let urls: Vec<String> = repositories.iter().map(|r| r.url.clone()).collect();
        let etags: Vec<Option<String>> = repositories.iter().map(|r| r.etag.clone()).collect();
        let data: Vec<Value> = repositories.iter().map(|r| r.data.clone()).collect();
        let updated_at: Vec<DateTime<Utc>> = repositories.iter().map(|r| r.updated_at).collect();

        sqlx::query(
            r#"
INSERT INTO repositories (github_id, name, url, etag, data, created_at, updated_at)
SELECT github_id, name, url, etag, data, updated_at, updated_at
FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[], $5::jsonb[], $6::timestamptz[])
    AS t(github_id, name, url, etag, data, updated_at)
ON CONFLICT (github_id) DO UPDATE SET
    name = EXCLUDED.name,
    url = EXCLUDED.url,
    etag = EXCLUDED.etag,
    data = EXCLUDED.data,
    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&github_ids)
        .bind(&names)
        .bind(&urls)
        .bind(&etags)
        .bind(&data)
        .bind(&updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::query("INSERT", error))?;

        Ok(())
    }

    async fn repository_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        self.internal_ids("repositories", github_ids).await
    }

    async fn upsert_events(&self, events: &[EventAttributes]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let event_ids: Vec<String> = events.iter().map(|e| e.event_id.clone()).collect();
        let event_types: Vec<String> = events.iter().map(|e| e.event_type.clone()).collect();
        let actor_ids: Vec<Option<i64>> = events.iter().map(|e| e.actor_id).collect();
        let repository_ids: Vec<Option<i64>> = events.iter().map(|e| e.repository_id).collect();
        let repository_identifiers: Vec<i64> =
            events.iter().map(|e| e.repository_identifier).collect();
        let push_identifiers: Vec<i64> = events.iter().map(|e| e.push_identifier).collect();
        let refs: Vec<String> = events.iter().map(|e| e.git_ref.clone()).collect();
        let heads: Vec<String> = events.iter().map(|e| e.head.clone()).collect();
        let befores: Vec<String> = events.iter().map(|e| e.before.clone()).collect();
        let publics: Vec<Option<bool>> = events.iter().map(|e| e.public).collect();
        let github_created_at: Vec<Option<DateTime<Utc>>> =
            events.iter().map(|e| e.github_created_at).collect();
        let data: Vec<Value> = events.iter().map(|e| e.data.clone()).collect();
        let created_at: Vec<DateTime<Utc>> = events.iter().map(|e| e.created_at).collect();
        let updated_at: Vec<DateTime<Utc>> = events.iter().map(|e| e.updated_at).collect();

        sqlx::query(
            r#"
INSERT INTO github_events (
    event_id, event_type, actor_id, repository_id, repository_identifier, push_identifier,
    ref, head, before, public, github_created_at, data, created_at, updated_at
)
SELECT
    event_id, event_type, actor_id, repository_id, repository_identifier, push_identifier,
    git_ref, head_sha, before_sha, is_public, github_created_at, data, created_at, updated_at
FROM UNNEST(
    $1::text[], $2::text[], $3::bigint[], $4::bigint[], $5::bigint[], $6::bigint[],
    $7::text[], $8::text[], $9::text[], $10::boolean[], $11::timestamptz[], $12::jsonb[],
    $13::timestamptz[], $14::timestamptz[]
) AS t(
    event_id, event_type, actor_id, repository_id, repository_identifier, push_identifier,
    git_ref, head_sha, before_sha, is_public, github_created_at, data, created_at, updated_at
)
ON CONFLICT (event_id) DO UPDATE SET
    event_type = EXCLUDED.event_type,
    actor_id = EXCLUDED.actor_id,
    repository_id = EXCLUDED.repository_id,
    repository_identifier = EXCLUDED.repository_identifier,
    push_identifier = EXCLUDED.push_identifier,
    ref = EXCLUDED.ref,
    head = EXCLUDED.head,
    before = EXCLUDED.before,
    public = EXCLUDED.public,
    github_created_at = EXCLUDED.github_created_at,
    data = EXCLUDED.data,
    updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&event_ids)
        .bind(&event_types)
        .bind(&actor_ids)
        .bind(&repository_ids)
        .bind(&repository_identifiers)
        .bind(&push_identifiers)
        .bind(&refs)
        .bind(&heads)
        .bind(&befores)
        .bind(&publics)
        .bind(&github_created_at)
        .bind(&data)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::query("INSERT", error))?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for PgStore {
    async fn load_state(&self) -> StoreResult<PollState> {
        let state: Option<Value> = sqlx::query_scalar("SELECT state FROM poll_state WHERE key = $1")
            .bind(POLL_STATE_KEY)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::query("SELECT", error))?;

        let Some(state) = state else {
            return Ok(PollState::default());
        };

        match serde_json::from_value(state) {
            Ok(state) => Ok(state),
            Err(error) => {
                warn!("discarding unreadable poll state: {}", error);
                Ok(PollState::default())
            }
        }
    }

    async fn write_state(&self, state: &PollState) -> StoreResult<()> {
        let state = serde_json::to_value(state)?;

        sqlx::query(
            r#"
INSERT INTO poll_state (key, state, updated_at)
VALUES ($1, $2, NOW())
ON CONFLICT (key) DO UPDATE SET state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(POLL_STATE_KEY)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::query("INSERT", error))?;

        Ok(())
    }
}
