use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::types::{EnrichmentRow, EventAttributes, ResourceRef};

pub const PUSH_EVENT: &str = "PushEvent";

const BOT_SUFFIX: &str = "[bot]";
const REQUIRED_PAYLOAD_FIELDS: [&str; 5] = ["repository_id", "push_id", "ref", "head", "before"];

/// Keep the valid push events of a raw feed page, first occurrence of each id wins.
/// Anything malformed is dropped silently; callers compare lengths for accounting.
pub fn normalize(items: &[Value], captured_at: DateTime<Utc>) -> Vec<EnrichmentRow> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter_map(|item| build_row(item, captured_at))
        .filter(|row| seen.insert(row.event.event_id.clone()))
        .collect()
}

fn build_row(item: &Value, captured_at: DateTime<Utc>) -> Option<EnrichmentRow> {
    let event = item.as_object()?;
    if event.get("type").and_then(Value::as_str) != Some(PUSH_EVENT) {
        return None;
    }

    let event_id = event.get("id").filter(|v| is_present(v)).map(stringify)?;
    let payload = event.get("payload")?.as_object()?;
    if !REQUIRED_PAYLOAD_FIELDS
        .iter()
        .all(|field| payload.get(*field).is_some_and(is_present))
    {
        return None;
    }

    let attributes = EventAttributes {
        event_id,
        event_type: PUSH_EVENT.to_string(),
        actor_id: None,
        repository_id: None,
        repository_identifier: json_i64(&payload["repository_id"])?,
        push_identifier: json_i64(&payload["push_id"])?,
        git_ref: stringify(&payload["ref"]),
        head: stringify(&payload["head"]),
        before: stringify(&payload["before"]),
        public: event.get("public").and_then(Value::as_bool),
        github_created_at: event
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc)),
        data: item.clone(),
        created_at: captured_at,
        updated_at: captured_at,
    };

    Some(EnrichmentRow {
        event: attributes,
        actor: actor_ref(event),
        repo: descriptor_ref(event.get("repo")),
    })
}

fn actor_ref(event: &Map<String, Value>) -> Option<ResourceRef> {
    let actor = event.get("actor")?;
    let is_bot = actor
        .get("login")
        .and_then(Value::as_str)
        .is_some_and(|login| login.ends_with(BOT_SUFFIX));
    if is_bot {
        return None;
    }
    descriptor_ref(Some(actor))
}

fn descriptor_ref(descriptor: Option<&Value>) -> Option<ResourceRef> {
    let descriptor = descriptor?.as_object()?;
    let github_id = descriptor.get("id").and_then(json_i64)?;
    let url = descriptor
        .get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())?;

    Some(ResourceRef {
        github_id,
        url: url.to_string(),
    })
}

/// Null, blank strings and empty containers count as absent.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Integer ids arrive either as JSON numbers or as numeric strings.
pub fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
