use std::collections::HashMap;
use std::time::Duration;

use crate::budget::parse_header_count;
use crate::fetch::FetchResponse;

/// Per-kind enrichment counters. `attempted` is the number of API calls made.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub unique_ids: usize,
    pub attempted: usize,
    pub fetched: usize,
    pub not_modified: usize,
    pub mismatched: usize,
    pub decode_error: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Ok,
    NotModified,
    RateLimited,
    Backoff,
    Unexpected,
}

impl ScheduleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleOutcome::Ok => "ok",
            ScheduleOutcome::NotModified => "not_modified",
            ScheduleOutcome::RateLimited => "rate_limited",
            ScheduleOutcome::Backoff => "backoff",
            ScheduleOutcome::Unexpected => "unexpected",
        }
    }
}

/// What the scheduler decided and why.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleDecision {
    pub outcome: ScheduleOutcome,
    pub interval: Duration,
    pub server_interval: Option<u64>,
    pub rate_limited: bool,
    pub reset_in: Option<u64>,
    pub reason: Option<String>,
    pub error_message: Option<String>,
}

impl ScheduleDecision {
    pub fn new(outcome: ScheduleOutcome, interval: Duration) -> Self {
        Self {
            outcome,
            interval,
            server_interval: None,
            rate_limited: false,
            reset_in: None,
            reason: None,
            error_message: None,
        }
    }
}

/// Everything a poll cycle learned, filled in stage by stage and rendered once at the end.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub decode_error: bool,
    pub events_received: usize,
    pub events_count: usize,
    pub actor_stats: Option<EnrichmentStats>,
    pub repo_stats: Option<EnrichmentStats>,
    pub api_calls_made: usize,
    pub schedule: Option<ScheduleDecision>,
}

impl CycleStats {
    pub fn record_fetch(&mut self, response: &FetchResponse) {
        self.status = Some(response.status);
        self.headers = response.headers.clone();
        self.decode_error = response.decode_error;
    }

    pub fn record_events(&mut self, received: usize, processed: usize) {
        self.events_received = received;
        self.events_count = processed;
    }

    pub fn record_enrichment(
        &mut self,
        actors: Option<EnrichmentStats>,
        repos: Option<EnrichmentStats>,
        api_calls_made: usize,
    ) {
        self.actor_stats = actors;
        self.repo_stats = repos;
        self.api_calls_made = api_calls_made;
    }

    pub fn record_schedule(&mut self, decision: ScheduleDecision) {
        self.schedule = Some(decision);
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn rate_limit_limit(&self) -> Option<i64> {
        parse_header_count(self.header("x-ratelimit-limit"))
    }

    /// Remaining calls as reported by the feed response, before enrichment.
    pub fn rate_limit_remaining_hint(&self) -> Option<i64> {
        parse_header_count(self.header("x-ratelimit-remaining"))
    }

    /// Calls left once this cycle's secondary fetches are accounted for.
    /// A missing header counts as zero.
    pub fn rate_limit_remaining(&self) -> i64 {
        self.rate_limit_remaining_hint().unwrap_or(0) - self.calls_made()
    }

    /// Calls that were available before the feed fetch.
    pub fn rate_limit_before(&self) -> i64 {
        self.rate_limit_remaining_hint().unwrap_or(0) + 1
    }

    /// The feed fetch plus every secondary fetch.
    pub fn total_api_calls(&self) -> usize {
        self.api_calls_made + 1
    }

    fn calls_made(&self) -> i64 {
        i64::try_from(self.api_calls_made).unwrap_or(i64::MAX)
    }
}
