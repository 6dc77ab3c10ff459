use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::pipeline::{FetchedResource, ResourceKind};
use crate::store::{Store, StoreResult};
use crate::types::{CachedResource, EnrichmentRow, RepositoryRecord, ResourceRef};

/// Repositories pushed to, resolved from `/repos/<owner>/<name>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Repositories;

#[async_trait]
impl ResourceKind for Repositories {
    type Record = RepositoryRecord;

    fn label(&self) -> &'static str {
        "repositories"
    }

    fn reference<'r>(&self, row: &'r EnrichmentRow) -> Option<&'r ResourceRef> {
        row.repo.as_ref()
    }

    fn assign(&self, row: &mut EnrichmentRow, internal_id: Option<i64>) {
        row.event.repository_id = internal_id;
    }

    fn build_record(&self, fetched: FetchedResource, now: DateTime<Utc>) -> RepositoryRecord {
        let name = ["full_name", "name"]
            .iter()
            .find_map(|field| fetched.data.get(*field).and_then(Value::as_str))
            .map(str::to_string);

        RepositoryRecord {
            github_id: fetched.github_id,
            name,
            url: fetched.url,
            etag: fetched.headers.get("etag").cloned(),
            data: fetched.data,
            updated_at: now,
        }
    }

    async fn cached(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>> {
        store.cached_repositories(github_ids).await
    }

    async fn upsert(&self, store: &dyn Store, records: &[RepositoryRecord]) -> StoreResult<()> {
        store.upsert_repositories(records).await
    }

    async fn internal_ids(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>> {
        store.repository_ids(github_ids).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn fetched(data: Value) -> FetchedResource {
        FetchedResource {
            github_id: 1296269,
            url: "https://api.github.com/repos/octocat/Hello-World".to_string(),
            data,
            headers: HashMap::new(),
        }
    }

    #[test]
    fn prefers_full_name() {
        let record = Repositories.build_record(
            fetched(json!({"id": 1296269, "name": "Hello-World", "full_name": "octocat/Hello-World"})),
            Utc::now(),
        );
        assert_eq!(record.name.as_deref(), Some("octocat/Hello-World"));
        assert_eq!(record.etag, None);

        let record = Repositories.build_record(fetched(json!({"id": 1296269, "name": "Hello-World"})), Utc::now());
        assert_eq!(record.name.as_deref(), Some("Hello-World"));
    }
}
