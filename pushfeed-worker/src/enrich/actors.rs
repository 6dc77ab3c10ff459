use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::pipeline::{FetchedResource, ResourceKind};
use crate::store::{Store, StoreResult};
use crate::types::{ActorRecord, CachedResource, EnrichmentRow, ResourceRef};

/// Users that pushed, resolved from `/users/<login>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Actors;

fn string_field(data: &Value, field: &str) -> Option<String> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ResourceKind for Actors {
    type Record = ActorRecord;

    fn label(&self) -> &'static str {
        "actors"
    }

    fn reference<'r>(&self, row: &'r EnrichmentRow) -> Option<&'r ResourceRef> {
        row.actor.as_ref()
    }

    fn assign(&self, row: &mut EnrichmentRow, internal_id: Option<i64>) {
        row.event.actor_id = internal_id;
    }

    fn build_record(&self, fetched: FetchedResource, now: DateTime<Utc>) -> ActorRecord {
        let login = string_field(&fetched.data, "login");
        ActorRecord {
            github_id: fetched.github_id,
            display_login: string_field(&fetched.data, "display_login").or_else(|| login.clone()),
            login,
            avatar_url: string_field(&fetched.data, "avatar_url"),
            url: fetched.url,
            etag: fetched.headers.get("etag").cloned(),
            data: fetched.data,
            updated_at: now,
        }
    }

    async fn cached(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        store.cached_actors(github_ids).await
    }

    async fn upsert(&self, store: &dyn Store, records: &[ActorRecord]) -> StoreResult<()> {
        store.upsert_actors(records).await
    }

    async fn internal_ids(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        store.actor_ids(github_ids).await
    }
}
