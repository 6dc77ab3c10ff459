#![allow(dead_code)]

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::HttpMockRequest;
use httpmock::MockServer;
use serde_json::{json, Value};

use pushfeed_worker::cycle::Poller;
use pushfeed_worker::error::ErrorSink;
use pushfeed_worker::fetch::{EventsClient, ResourceClient};
use pushfeed_worker::schedule::PollState;
use pushfeed_worker::store::{MemoryStore, StateStore, Store, StoreError, StoreResult};
use pushfeed_worker::types::{ActorRecord, CachedResource, EventAttributes, RepositoryRecord};

pub const EVENTS_PATH: &str = "/events";

/// Collects reported errors with their context.
#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<(String, &'static str)>>);

impl RecordingSink {
    pub fn contexts(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(|(_, c)| *c).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, error: &(dyn StdError + 'static), context: &'static str) {
        self.0.lock().unwrap().push((error.to_string(), context));
    }
}

/// Wraps a `MemoryStore` and fails the selected operations.
#[derive(Default)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_actor_lookup: bool,
    pub fail_event_upsert: bool,
}

fn pool_timeout() -> StoreError {
    StoreError::ConnectionError {
        error: sqlx::Error::PoolTimedOut,
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn cached_actors(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        if self.fail_actor_lookup {
            return Err(pool_timeout());
        }
        self.inner.cached_actors(github_ids).await
    }

    async fn upsert_actors(&self, actors: &[ActorRecord]) -> StoreResult<()> {
        self.inner.upsert_actors(actors).await
    }

    async fn actor_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        self.inner.actor_ids(github_ids).await
    }

    async fn cached_repositories(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        self.inner.cached_repositories(github_ids).await
    }

    async fn upsert_repositories(&self, repositories: &[RepositoryRecord]) -> StoreResult<()> {
        self.inner.upsert_repositories(repositories).await
    }

    async fn repository_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        self.inner.repository_ids(github_ids).await
    }

    async fn upsert_events(&self, events: &[EventAttributes]) -> StoreResult<()> {
        if self.fail_event_upsert {
            return Err(StoreError::query("INSERT", sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert_events(events).await
    }
}

/// State store whose reads fail while writes still reach `inner`.
#[derive(Default)]
pub struct UnreadableState {
    pub inner: MemoryStore,
}

#[async_trait]
impl StateStore for UnreadableState {
    async fn load_state(&self) -> StoreResult<PollState> {
        Err(pool_timeout())
    }

    async fn write_state(&self, state: &PollState) -> StoreResult<()> {
        self.inner.write_state(state).await
    }
}

/// Request matcher for calls that carry no `If-None-Match` header.
pub fn without_etag(request: &HttpMockRequest) -> bool {
    !request.headers.as_ref().is_some_and(|headers| {
        headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("if-none-match"))
    })
}

pub fn client(read_timeout: Duration) -> ResourceClient {
    ResourceClient::new(
        "github_events/Test",
        Duration::from_secs(1),
        read_timeout,
        None,
    )
    .unwrap()
}

pub fn poller(
    server: &MockServer,
    store: Arc<dyn Store>,
    state: Arc<dyn StateStore>,
    errors: Arc<RecordingSink>,
) -> Poller {
    Poller::new(
        EventsClient::new(client(Duration::from_millis(500)), server.url(EVENTS_PATH)),
        client(Duration::from_secs(2)),
        client(Duration::from_secs(2)),
        store,
        state,
        errors,
    )
}

pub fn actor_path(login: &str) -> String {
    format!("/users/{login}")
}

pub fn repo_path(name: &str) -> String {
    format!("/repos/octo-org/{name}")
}

/// A valid push event whose actor and repo urls point at `server`.
pub fn push_event(server: &MockServer, id: &str, actor: (i64, &str), repo: (i64, &str)) -> Value {
    let (actor_id, login) = actor;
    let (repo_id, name) = repo;
    json!({
        "id": id,
        "type": "PushEvent",
        "public": true,
        "created_at": "2024-06-01T11:59:00Z",
        "actor": {
            "id": actor_id,
            "login": login,
            "display_login": login,
            "url": server.url(actor_path(login)),
            "avatar_url": format!("https://avatars.githubusercontent.com/u/{actor_id}?")
        },
        "repo": {
            "id": repo_id,
            "name": format!("octo-org/{name}"),
            "url": server.url(repo_path(name))
        },
        "payload": {
            "repository_id": repo_id,
            "push_id": 19000000000_i64 + repo_id,
            "size": 1,
            "ref": "refs/heads/main",
            "head": "7a8f3ac80e2ad2f6842cb86f576d4bfe2c03e4ae",
            "before": "d1b5b1e8d8d4e4e2f3c4a1b2c3d4e5f6a7b8c9d0"
        }
    })
}

pub fn watch_event(id: &str) -> Value {
    json!({
        "id": id,
        "type": "WatchEvent",
        "actor": {"id": 1, "login": "someone", "url": "https://api.github.com/users/someone"},
        "payload": {"action": "started"}
    })
}

pub fn user_body(id: i64, login: &str) -> Value {
    json!({
        "id": id,
        "login": login,
        "avatar_url": format!("https://avatars.githubusercontent.com/u/{id}?v=4"),
        "type": "User"
    })
}

pub fn repo_body(id: i64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "full_name": format!("octo-org/{name}"),
        "private": false
    })
}
