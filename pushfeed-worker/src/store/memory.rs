use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{StateStore, Store, StoreResult};
use crate::schedule::PollState;
use crate::types::{ActorRecord, CachedResource, EventAttributes, RepositoryRecord};

#[derive(Debug, Clone)]
struct Stored<T> {
    id: i64,
    record: T,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    actors: HashMap<i64, Stored<ActorRecord>>,
    repositories: HashMap<i64, Stored<RepositoryRecord>>,
    events: BTreeMap<String, EventAttributes>,
    event_writes: usize,
    state: Option<PollState>,
}

/// Process-local store with the same upsert semantics as the Postgres one.
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn actor(&self, github_id: i64) -> Option<ActorRecord> {
        self.lock().actors.get(&github_id).map(|s| s.record.clone())
    }

    pub fn actor_count(&self) -> usize {
        self.lock().actors.len()
    }

    pub fn repository(&self, github_id: i64) -> Option<RepositoryRecord> {
        self.lock()
            .repositories
            .get(&github_id)
            .map(|s| s.record.clone())
    }

    pub fn repository_count(&self) -> usize {
        self.lock().repositories.len()
    }

    /// Stored events ordered by event id.
    pub fn events(&self) -> Vec<EventAttributes> {
        self.lock().events.values().cloned().collect()
    }

    /// Number of upsert_events calls that carried at least one event.
    pub fn event_writes(&self) -> usize {
        self.lock().event_writes
    }

    pub fn state(&self) -> Option<PollState> {
        self.lock().state.clone()
    }
}

fn upsert_resource<T: Clone>(
    table: &mut HashMap<i64, Stored<T>>,
    next_id: &mut i64,
    github_id: i64,
    record: &T,
) {
    if let Some(stored) = table.get_mut(&github_id) {
        stored.record = record.clone();
        return;
    }
    *next_id += 1;
    table.insert(
        github_id,
        Stored {
            id: *next_id,
            record: record.clone(),
        },
    );
}

#[async_trait]
impl Store for MemoryStore {
    async fn cached_actors(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        let inner = self.lock();
        Ok(github_ids
            .iter()
            .filter_map(|id| inner.actors.get(id))
            .map(|stored| CachedResource {
                github_id: stored.record.github_id,
                etag: stored.record.etag.clone(),
                updated_at: stored.record.updated_at,
            })
            .collect())
    }

    async fn upsert_actors(&self, actors: &[ActorRecord]) -> StoreResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for actor in actors {
            upsert_resource(&mut inner.actors, &mut inner.next_id, actor.github_id, actor);
        }
        Ok(())
    }

    async fn actor_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        let inner = self.lock();
        Ok(github_ids
            .iter()
            .filter_map(|id| inner.actors.get(id).map(|stored| (*id, stored.id)))
            .collect())
    }

    async fn cached_repositories(&self, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        let inner = self.lock();
        Ok(github_ids
            .iter()
            .filter_map(|id| inner.repositories.get(id))
            .map(|stored| CachedResource {
                github_id: stored.record.github_id,
                etag: stored.record.etag.clone(),
                updated_at: stored.record.updated_at,
            })
            .collect())
    }

    async fn upsert_repositories(&self, repositories: &[RepositoryRecord]) -> StoreResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        for repository in repositories {
            upsert_resource(
                &mut inner.repositories,
                &mut inner.next_id,
                repository.github_id,
                repository,
            );
        }
        Ok(())
    }

    async fn repository_ids(&self, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        let inner = self.lock();
        Ok(github_ids
            .iter()
            .filter_map(|id| inner.repositories.get(id).map(|stored| (*id, stored.id)))
            .collect())
    }

    async fn upsert_events(&self, events: &[EventAttributes]) -> StoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        inner.event_writes += 1;
        for event in events {
            let mut event = event.clone();
            if let Some(existing) = inner.events.get(&event.event_id) {
                event.created_at = existing.created_at;
            }
            inner.events.insert(event.event_id.clone(), event);
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load_state(&self) -> StoreResult<PollState> {
        Ok(self.lock().state.clone().unwrap_or_default())
    }

    async fn write_state(&self, state: &PollState) -> StoreResult<()> {
        self.lock().state = Some(state.clone());
        Ok(())
    }
}
