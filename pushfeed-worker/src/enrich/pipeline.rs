use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use super::EnrichmentPolicy;
use crate::budget::Budget;
use crate::error::EnrichError;
use crate::fetch::{FetchResponse, ResourceClient};
use crate::metrics_consts::RESOURCE_FETCHES;
use crate::normalize::json_i64;
use crate::stats::EnrichmentStats;
use crate::store::{Store, StoreError, StoreResult};
use crate::types::{CachedResource, EnrichmentRow, ResourceRef};

/// A successfully fetched resource, ready to become a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedResource {
    pub github_id: i64,
    pub url: String,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

/// One kind of secondary resource referenced from push events.
#[async_trait]
pub trait ResourceKind: Send + Sync {
    type Record: Send + Sync;

    /// Used in logs, metrics and error reports.
    fn label(&self) -> &'static str;

    fn reference<'r>(&self, row: &'r EnrichmentRow) -> Option<&'r ResourceRef>;

    /// Store the resolved internal id on the row's event.
    fn assign(&self, row: &mut EnrichmentRow, internal_id: Option<i64>);

    fn build_record(&self, fetched: FetchedResource, now: DateTime<Utc>) -> Self::Record;

    async fn cached(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<Vec<CachedResource>>;

    async fn upsert(&self, store: &dyn Store, records: &[Self::Record]) -> StoreResult<()>;

    async fn internal_ids(&self, store: &dyn Store, github_ids: &[i64]) -> StoreResult<HashMap<i64, i64>>;

    /// Unique references in first-seen order. The first url seen for an id wins.
    fn collect_refs(&self, rows: &[EnrichmentRow]) -> Vec<ResourceRef> {
        let mut seen = HashSet::new();
        rows.iter()
            .filter_map(|row| self.reference(row))
            .filter(|reference| seen.insert(reference.github_id))
            .cloned()
            .collect()
    }
}

/// How one secondary fetch turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(Value),
    NotModified,
    DecodeError,
    Mismatched(Value),
    Failed(u16),
}

impl FetchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchOutcome::Fetched(_) => "fetched",
            FetchOutcome::NotModified => "not_modified",
            FetchOutcome::DecodeError => "decode_error",
            FetchOutcome::Mismatched(_) => "mismatched",
            FetchOutcome::Failed(_) => "failed",
        }
    }
}

pub fn classify(expected_id: i64, response: FetchResponse) -> FetchOutcome {
    if response.decode_error {
        return FetchOutcome::DecodeError;
    }
    match response.status {
        304 => FetchOutcome::NotModified,
        200 => match response.json {
            Some(data) if data.get("id").and_then(json_i64) == Some(expected_id) => {
                FetchOutcome::Fetched(data)
            }
            Some(data) => FetchOutcome::Mismatched(data.get("id").cloned().unwrap_or(Value::Null)),
            None => FetchOutcome::DecodeError,
        },
        status => FetchOutcome::Failed(status),
    }
}

/// Missing references first, then stale ones, up to `limit`.
pub fn pick_fetchable<'r>(
    refs: &'r [ResourceRef],
    existing: &HashMap<i64, CachedResource>,
    limit: usize,
    refresh_after: chrono::Duration,
    now: DateTime<Utc>,
) -> Vec<&'r ResourceRef> {
    let stale_before = now - refresh_after;
    let missing = refs
        .iter()
        .filter(|r| !existing.contains_key(&r.github_id));
    let stale = refs.iter().filter(|r| {
        existing
            .get(&r.github_id)
            .is_some_and(|cached| cached.updated_at < stale_before)
    });

    missing.chain(stale).take(limit).collect()
}

/// Resolve every reference of one kind in `rows` under `budget`, refreshing
/// what is missing or stale, and write internal ids back into the rows.
pub async fn enrich_kind<K: ResourceKind>(
    kind: &K,
    client: &ResourceClient,
    store: &dyn Store,
    rows: &mut [EnrichmentRow],
    budget: Budget,
    policy: &EnrichmentPolicy,
) -> Result<EnrichmentStats, EnrichError> {
    let store_error = |error: StoreError| EnrichError::Store {
        kind: kind.label(),
        error,
    };

    let refs = kind.collect_refs(rows);
    let mut stats = EnrichmentStats {
        unique_ids: refs.len(),
        ..Default::default()
    };
    if refs.is_empty() {
        return Ok(stats);
    }

    let now = Utc::now();
    let github_ids: Vec<i64> = refs.iter().map(|r| r.github_id).collect();
    let existing: HashMap<i64, CachedResource> = kind
        .cached(store, &github_ids)
        .await
        .map_err(store_error)?
        .into_iter()
        .map(|cached| (cached.github_id, cached))
        .collect();

    let to_fetch = pick_fetchable(
        &refs,
        &existing,
        budget.limit(policy.max_fetch_per_batch),
        policy.refresh_after,
        now,
    );

    let mut records = Vec::with_capacity(to_fetch.len());
    for reference in to_fetch {
        stats.attempted += 1;
        let etag = existing
            .get(&reference.github_id)
            .and_then(|cached| cached.etag.as_deref());
        let response = client.fetch_resource(&reference.url, etag).await;
        let headers = response.headers.clone();
        let outcome = classify(reference.github_id, response);

        metrics::counter!(
            RESOURCE_FETCHES,
            &[("kind", kind.label()), ("result", outcome.as_str())]
        )
        .increment(1);

        match outcome {
            FetchOutcome::Fetched(data) => {
                stats.fetched += 1;
                records.push(kind.build_record(
                    FetchedResource {
                        github_id: reference.github_id,
                        url: reference.url.clone(),
                        data,
                        headers,
                    },
                    now,
                ));
            }
            FetchOutcome::NotModified => stats.not_modified += 1,
            FetchOutcome::DecodeError => {
                warn!(kind = kind.label(), url = reference.url.as_str(), "undecodable resource body");
                stats.decode_error += 1;
            }
            FetchOutcome::Mismatched(actual) => {
                warn!(
                    kind = kind.label(),
                    expected = reference.github_id,
                    actual = %actual,
                    "resource id mismatch, discarding"
                );
                stats.mismatched += 1;
            }
            FetchOutcome::Failed(status) => {
                warn!(kind = kind.label(), url = reference.url.as_str(), status, "resource fetch failed");
                stats.failed += 1;
            }
        }
    }

    if !records.is_empty() {
        kind.upsert(store, &records).await.map_err(store_error)?;
    }

    let internal_ids = kind
        .internal_ids(store, &github_ids)
        .await
        .map_err(store_error)?;
    for row in rows.iter_mut() {
        if let Some(github_id) = kind.reference(row).map(|r| r.github_id) {
            kind.assign(row, internal_ids.get(&github_id).copied());
        }
    }

    Ok(stats)
}
