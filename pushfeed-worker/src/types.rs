use chrono::{DateTime, Utc};
use serde_json::Value;

/// Pointer from an event to a secondary resource: its upstream id and api url.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub github_id: i64,
    pub url: String,
}

/// The persisted shape of a push event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventAttributes {
    pub event_id: String,
    pub event_type: String,
    pub actor_id: Option<i64>,
    pub repository_id: Option<i64>,
    pub repository_identifier: i64,
    pub push_identifier: i64,
    pub git_ref: String,
    pub head: String,
    pub before: String,
    pub public: Option<bool>,
    pub github_created_at: Option<DateTime<Utc>>,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized event on its way through enrichment. The references only
/// live for the duration of a cycle and are dropped on conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRow {
    pub event: EventAttributes,
    pub actor: Option<ResourceRef>,
    pub repo: Option<ResourceRef>,
}

impl From<EnrichmentRow> for EventAttributes {
    fn from(row: EnrichmentRow) -> Self {
        row.event
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActorRecord {
    pub github_id: i64,
    pub login: Option<String>,
    pub display_login: Option<String>,
    pub avatar_url: Option<String>,
    pub url: String,
    pub etag: Option<String>,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryRecord {
    pub github_id: i64,
    pub name: Option<String>,
    pub url: String,
    pub etag: Option<String>,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// What enrichment needs to know about a resource that is already stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResource {
    pub github_id: i64,
    pub etag: Option<String>,
    pub updated_at: DateTime<Utc>,
}
