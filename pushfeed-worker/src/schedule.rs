use std::time::Duration;

use chrono::{DateTime, Utc};
use pushfeed_common::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};

use crate::budget::{parse_header_count, RATE_LIMIT_THRESHOLD};
use crate::error::ErrorSink;
use crate::stats::{CycleStats, ScheduleDecision, ScheduleOutcome};
use crate::store::{StateStore, StoreResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(30);
pub const MAX_BACKOFF: Duration = Duration::from_secs(900);

/// Seconds added on top of a rate limit reset countdown.
const RESET_PADDING_SECONDS: u64 = 5;

/// The persisted scheduling state of the feed poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollState {
    pub etag: Option<String>,
    pub poll_interval_seconds: Option<u64>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_status: Option<u16>,
    pub last_error: Option<String>,
}

impl PollState {
    /// The last persisted interval, or `default` when none is usable.
    pub fn effective_interval(&self, default: Duration) -> Duration {
        match self.poll_interval_seconds {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => default,
        }
    }

    /// Whether the previous poll ended in a server error or timeout.
    pub fn in_backoff(&self) -> bool {
        let server_error = self
            .last_status
            .is_some_and(|status| (500..=599).contains(&status));
        let timed_out = self
            .last_error
            .as_deref()
            .is_some_and(|error| error.contains("timeout"));
        server_error || timed_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub default_interval: Duration,
    pub backoff: BackoffPolicy,
    pub rate_limit_threshold: i64,
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_POLL_INTERVAL,
            backoff: BackoffPolicy::new(2, INITIAL_BACKOFF, MAX_BACKOFF),
            rate_limit_threshold: RATE_LIMIT_THRESHOLD,
        }
    }
}

/// The state that was persisted and the interval until the next poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled {
    pub state: PollState,
    pub next_interval: Duration,
}

/// Seconds until the rate limit window resets, from the `x-ratelimit-reset` epoch header.
/// Absent when the header is missing or not a positive timestamp.
pub fn rate_limit_reset_in(stats: &CycleStats, now: DateTime<Utc>) -> Option<u64> {
    let reset_at = parse_header_count(stats.header("x-ratelimit-reset")).filter(|r| *r > 0)?;
    let remaining = reset_at.saturating_sub(now.timestamp()).max(0);
    u64::try_from(remaining).ok()
}

/// Turns the outcome of a poll into the next interval and persists the new state.
pub struct Scheduler<'a> {
    store: &'a dyn StateStore,
    errors: &'a dyn ErrorSink,
    policy: SchedulePolicy,
}

impl<'a> Scheduler<'a> {
    pub fn new(store: &'a dyn StateStore, errors: &'a dyn ErrorSink, policy: SchedulePolicy) -> Self {
        Self {
            store,
            errors,
            policy,
        }
    }

    pub async fn load_state(&self) -> StoreResult<PollState> {
        self.store.load_state().await
    }

    /// A 200 or 304 from the feed. Honours the server's poll interval and waits
    /// for the rate limit window when this cycle used up the spare calls.
    pub async fn apply_success(
        &self,
        state: &PollState,
        stats: &mut CycleStats,
        outcome: ScheduleOutcome,
        now: DateTime<Utc>,
    ) -> Scheduled {
        let default = self.policy.default_interval;
        let server_interval =
            parse_header_count(stats.header("x-poll-interval")).and_then(|s| u64::try_from(s).ok());

        let mut interval = match server_interval {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds).max(default),
            _ => default,
        };

        let reset_in = rate_limit_reset_in(stats, now);
        let mut rate_limited = false;
        if stats.rate_limit_remaining() <= self.policy.rate_limit_threshold {
            if let Some(reset) = reset_in.filter(|r| *r > 0) {
                interval = interval.max(Duration::from_secs(reset + RESET_PADDING_SECONDS));
                rate_limited = true;
            }
        }

        let mut next = self.carry_over(state, stats, now);
        next.last_success_at = Some(now);
        next.last_status = stats.status;
        next.last_error = stats.decode_error.then(|| "invalid_json".to_string());

        let mut decision = ScheduleDecision::new(outcome, interval);
        decision.server_interval = server_interval;
        decision.rate_limited = rate_limited;
        decision.reset_in = reset_in;
        stats.record_schedule(decision);

        self.persist(next, interval).await
    }

    /// A 429 from the feed: wait for the reset plus padding.
    pub async fn apply_rate_limit(
        &self,
        state: &PollState,
        stats: &mut CycleStats,
        now: DateTime<Utc>,
    ) -> Scheduled {
        let reset_in = rate_limit_reset_in(stats, now);
        let interval = match reset_in {
            Some(reset) if reset > 0 => Duration::from_secs(reset + RESET_PADDING_SECONDS),
            _ => self.policy.default_interval,
        };

        let mut next = self.carry_over(state, stats, now);
        next.last_status = Some(429);
        next.last_error = Some(format!("rate_limited: reset_in={}s", reset_in.unwrap_or(0)));

        let mut decision = ScheduleDecision::new(ScheduleOutcome::RateLimited, interval);
        decision.rate_limited = true;
        decision.reset_in = reset_in;
        stats.record_schedule(decision);

        self.persist(next, interval).await
    }

    /// Server errors, timeouts and failures inside the cycle. Doubles the
    /// interval while the previous poll was also failing.
    pub async fn apply_backoff(
        &self,
        state: &PollState,
        stats: &mut CycleStats,
        reason: &str,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Scheduled {
        let mut next = self.carry_over(state, stats, now);
        if let Some(status) = stats.status {
            next.last_status = Some(status);
        }
        next.last_error = Some(match &error_message {
            Some(message) => format!("{reason}: {message}"),
            None => reason.to_string(),
        });

        let interval = self.decide_backoff(state, stats, reason, error_message);
        self.persist(next, interval).await
    }

    /// The backoff interval following `state`, recorded in `stats` but not persisted.
    pub fn decide_backoff(
        &self,
        state: &PollState,
        stats: &mut CycleStats,
        reason: &str,
        error_message: Option<String>,
    ) -> Duration {
        let interval = if state.in_backoff() {
            let previous = Duration::from_secs(state.poll_interval_seconds.unwrap_or(0));
            self.policy.backoff.next_interval(previous)
        } else {
            self.policy.backoff.first_interval()
        };

        let mut decision = ScheduleDecision::new(ScheduleOutcome::Backoff, interval);
        decision.reason = Some(reason.to_string());
        decision.error_message = error_message;
        stats.record_schedule(decision);

        interval
    }

    /// Any other status: keep polling at the current pace and record what happened.
    pub async fn apply_unexpected(
        &self,
        state: &PollState,
        stats: &mut CycleStats,
        now: DateTime<Utc>,
    ) -> Scheduled {
        let interval = state.effective_interval(self.policy.default_interval);
        let status = stats.status.unwrap_or(0);
        let error_message = match stats.header("x-github-request-id") {
            Some(request_id) if !request_id.trim().is_empty() => {
                format!("status={status} request_id={request_id}")
            }
            _ => format!("status={status}"),
        };

        let mut next = self.carry_over(state, stats, now);
        next.last_status = stats.status;
        next.last_error = Some(error_message.clone());

        let mut decision = ScheduleDecision::new(ScheduleOutcome::Unexpected, interval);
        decision.error_message = Some(error_message);
        stats.record_schedule(decision);

        self.persist(next, interval).await
    }

    fn carry_over(&self, state: &PollState, stats: &CycleStats, now: DateTime<Utc>) -> PollState {
        let etag = stats
            .header("etag")
            .filter(|e| !e.trim().is_empty())
            .map(str::to_string)
            .or_else(|| state.etag.clone());

        PollState {
            etag,
            last_polled_at: Some(now),
            ..state.clone()
        }
    }

    async fn persist(&self, mut state: PollState, interval: Duration) -> Scheduled {
        state.poll_interval_seconds = Some(interval.as_secs());
        if let Err(error) = self.store.write_state(&state).await {
            self.errors.report(&error, "scheduler:write_state");
        }
        Scheduled {
            state,
            next_interval: interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::FetchResponse;
    use crate::store::{MemoryStore, StoreError};

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(String, &'static str)>>);

    impl ErrorSink for RecordingSink {
        fn report(&self, error: &(dyn StdError + 'static), context: &'static str) {
            self.0.lock().unwrap().push((error.to_string(), context));
        }
    }

    struct BrokenStateStore;

    #[async_trait]
    impl StateStore for BrokenStateStore {
        async fn load_state(&self) -> StoreResult<PollState> {
            Ok(PollState::default())
        }

        async fn write_state(&self, _state: &PollState) -> StoreResult<()> {
            Err(StoreError::ConnectionError {
                error: sqlx::Error::PoolTimedOut,
            })
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fetched(status: u16, headers: &[(&str, String)]) -> CycleStats {
        let mut stats = CycleStats::default();
        stats.record_fetch(&FetchResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            json: None,
            decode_error: false,
        });
        stats
    }

    fn reset_in(seconds: i64) -> String {
        (now().timestamp() + seconds).to_string()
    }

    #[tokio::test]
    async fn success_uses_server_interval_when_larger() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(
            200,
            &[
                ("etag", "W/\"new\"".to_string()),
                ("x-poll-interval", "120".to_string()),
                ("x-ratelimit-remaining", "4000".to_string()),
            ],
        );
        let scheduled = scheduler
            .apply_success(&PollState::default(), &mut stats, ScheduleOutcome::Ok, now())
            .await;

        assert_eq!(scheduled.next_interval, Duration::from_secs(120));
        assert_eq!(scheduled.state.etag.as_deref(), Some("W/\"new\""));
        assert_eq!(scheduled.state.last_success_at, Some(now()));
        assert_eq!(scheduled.state.last_status, Some(200));
        assert_eq!(scheduled.state.last_error, None);
        assert_eq!(store.state(), Some(scheduled.state.clone()));
        let decision = stats.schedule.unwrap();
        assert_eq!(decision.server_interval, Some(120));
        assert!(!decision.rate_limited);
    }

    #[tokio::test]
    async fn success_never_polls_faster_than_default() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(304, &[("x-poll-interval", "10".to_string())]);
        let state = PollState {
            etag: Some("W/\"old\"".to_string()),
            ..Default::default()
        };
        let scheduled = scheduler
            .apply_success(&state, &mut stats, ScheduleOutcome::NotModified, now())
            .await;

        assert_eq!(scheduled.next_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(scheduled.state.etag.as_deref(), Some("W/\"old\""));
        assert_eq!(scheduled.state.last_status, Some(304));
    }

    #[tokio::test]
    async fn success_near_rate_limit_waits_for_reset() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(
            200,
            &[
                ("x-ratelimit-remaining", "8".to_string()),
                ("x-ratelimit-reset", reset_in(300)),
            ],
        );
        stats.record_enrichment(None, None, 3);
        let scheduled = scheduler
            .apply_success(&PollState::default(), &mut stats, ScheduleOutcome::Ok, now())
            .await;

        let seconds = scheduled.next_interval.as_secs();
        assert!((300..=305).contains(&seconds));
        let decision = stats.schedule.unwrap();
        assert!(decision.rate_limited);
        assert_eq!(decision.reset_in, Some(300));
    }

    #[tokio::test]
    async fn success_flags_invalid_json() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(200, &[("x-ratelimit-remaining", "50".to_string())]);
        stats.decode_error = true;
        let scheduled = scheduler
            .apply_success(&PollState::default(), &mut stats, ScheduleOutcome::Ok, now())
            .await;

        assert_eq!(scheduled.state.last_error.as_deref(), Some("invalid_json"));
    }

    #[tokio::test]
    async fn rate_limit_waits_for_reset() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(429, &[("x-ratelimit-reset", reset_in(120))]);
        let scheduled = scheduler
            .apply_rate_limit(&PollState::default(), &mut stats, now())
            .await;

        let seconds = scheduled.next_interval.as_secs();
        assert!((120..=126).contains(&seconds));
        assert_eq!(scheduled.state.last_status, Some(429));
        assert_eq!(
            scheduled.state.last_error.as_deref(),
            Some("rate_limited: reset_in=120s")
        );
    }

    #[tokio::test]
    async fn rate_limit_without_reset_uses_default() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(429, &[]);
        let scheduled = scheduler
            .apply_rate_limit(&PollState::default(), &mut stats, now())
            .await;

        assert_eq!(scheduled.next_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(
            scheduled.state.last_error.as_deref(),
            Some("rate_limited: reset_in=0s")
        );
    }

    #[tokio::test]
    async fn backoff_starts_at_initial_then_doubles() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut first_stats = fetched(502, &[]);
        let first = scheduler
            .apply_backoff(&PollState::default(), &mut first_stats, "server_error_502", None, now())
            .await;
        assert_eq!(first.next_interval, INITIAL_BACKOFF);
        assert_eq!(first.state.last_status, Some(502));
        assert_eq!(first.state.last_error.as_deref(), Some("server_error_502"));

        let mut second_stats = fetched(503, &[]);
        let second = scheduler
            .apply_backoff(&first.state, &mut second_stats, "server_error_503", None, now())
            .await;
        assert_eq!(second.next_interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());
        let state = PollState {
            last_status: Some(500),
            poll_interval_seconds: Some(500),
            ..Default::default()
        };

        let mut stats = fetched(500, &[]);
        let scheduled = scheduler
            .apply_backoff(&state, &mut stats, "server_error_500", None, now())
            .await;

        assert_eq!(scheduled.next_interval, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn timeouts_count_as_backoff_and_keep_status() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());
        let state = PollState {
            last_status: Some(200),
            last_error: Some("timeout: connection timed out".to_string()),
            poll_interval_seconds: Some(0),
            ..Default::default()
        };

        let mut stats = CycleStats::default();
        let scheduled = scheduler
            .apply_backoff(
                &state,
                &mut stats,
                "timeout",
                Some("execution expired".to_string()),
                now(),
            )
            .await;

        assert_eq!(scheduled.next_interval, Duration::from_secs(60));
        assert_eq!(scheduled.state.last_status, Some(200));
        assert_eq!(
            scheduled.state.last_error.as_deref(),
            Some("timeout: execution expired")
        );
        let decision = stats.schedule.unwrap();
        assert_eq!(decision.reason.as_deref(), Some("timeout"));
        assert_eq!(decision.error_message.as_deref(), Some("execution expired"));
    }

    #[tokio::test]
    async fn unexpected_keeps_current_pace() {
        let store = MemoryStore::new();
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());
        let state = PollState {
            poll_interval_seconds: Some(90),
            ..Default::default()
        };

        let mut stats = fetched(404, &[("x-github-request-id", "ABCD:1234".to_string())]);
        let scheduled = scheduler.apply_unexpected(&state, &mut stats, now()).await;

        assert_eq!(scheduled.next_interval, Duration::from_secs(90));
        assert_eq!(scheduled.state.last_status, Some(404));
        assert_eq!(
            scheduled.state.last_error.as_deref(),
            Some("status=404 request_id=ABCD:1234")
        );

        let mut stats = fetched(418, &[]);
        let scheduled = scheduler
            .apply_unexpected(&PollState::default(), &mut stats, now())
            .await;
        assert_eq!(scheduled.next_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(scheduled.state.last_error.as_deref(), Some("status=418"));
    }

    #[tokio::test]
    async fn failed_write_is_reported_and_interval_kept() {
        let store = BrokenStateStore;
        let sink = RecordingSink::default();
        let scheduler = Scheduler::new(&store, &sink, SchedulePolicy::default());

        let mut stats = fetched(200, &[]);
        let scheduled = scheduler
            .apply_success(&PollState::default(), &mut stats, ScheduleOutcome::Ok, now())
            .await;

        assert_eq!(scheduled.next_interval, DEFAULT_POLL_INTERVAL);
        let reported = sink.0.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].1, "scheduler:write_state");
    }

    #[test]
    fn tolerates_partial_persisted_state() {
        let state: PollState = serde_json::from_str(r#"{"etag": "W/\"x\"", "unknown": 1}"#).unwrap();
        assert_eq!(state.etag.as_deref(), Some("W/\"x\""));
        assert_eq!(state.poll_interval_seconds, None);
    }
}
