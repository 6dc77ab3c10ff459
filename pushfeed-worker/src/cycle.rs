use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pushfeed_common::metrics::{gauge, histogram, inc, timing_guard};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::enrich::{Enricher, EnrichmentPolicy};
use crate::error::{CycleError, ErrorSink, WorkerError};
use crate::fetch::{EventsClient, FetchResponse, ResourceClient};
use crate::metrics_consts::{
    CYCLES_TOTAL, CYCLE_DURATION, EVENTS_RECEIVED, EVENTS_RETAINED, NEXT_POLL_INTERVAL,
    SCHEDULED_INTERVAL,
};
use crate::normalize::normalize;
use crate::schedule::{PollState, SchedulePolicy, Scheduled, Scheduler};
use crate::stats::{CycleStats, ScheduleOutcome};
use crate::store::{StateStore, Store};
use crate::summary::log_summary;

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ok,
    NotModified,
    RateLimited,
    BackingOff,
    Error,
    Timeout,
    Exception,
}

impl PollOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollOutcome::Ok => "ok",
            PollOutcome::NotModified => "not_modified",
            PollOutcome::RateLimited => "rate_limited",
            PollOutcome::BackingOff => "backing_off",
            PollOutcome::Error => "error",
            PollOutcome::Timeout => "timeout",
            PollOutcome::Exception => "exception",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleResult {
    pub outcome: PollOutcome,
    pub next_interval: Duration,
    pub stats: CycleStats,
}

/// Runs one poll of the public events feed from state load to state write.
pub struct Poller {
    events: EventsClient,
    actors: ResourceClient,
    repositories: ResourceClient,
    store: Arc<dyn Store>,
    state_store: Arc<dyn StateStore>,
    errors: Arc<dyn ErrorSink>,
    enrichment: EnrichmentPolicy,
    schedule: SchedulePolicy,
}

impl Poller {
    pub fn new(
        events: EventsClient,
        actors: ResourceClient,
        repositories: ResourceClient,
        store: Arc<dyn Store>,
        state_store: Arc<dyn StateStore>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            events,
            actors,
            repositories,
            store,
            state_store,
            errors,
            enrichment: EnrichmentPolicy::default(),
            schedule: SchedulePolicy::default(),
        }
    }

    /// Build the three http clients from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        state_store: Arc<dyn StateStore>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, WorkerError> {
        let token = config.github_token.as_deref();
        let events = ResourceClient::new(
            &config.user_agent("PushEvents"),
            config.events_connect_timeout.0,
            config.events_read_timeout.0,
            token,
        )?;
        let actors = ResourceClient::new(
            &config.user_agent("ActorFetch"),
            config.resource_connect_timeout.0,
            config.resource_read_timeout.0,
            token,
        )?;
        let repositories = ResourceClient::new(
            &config.user_agent("RepositoryFetch"),
            config.resource_connect_timeout.0,
            config.resource_read_timeout.0,
            token,
        )?;

        Ok(Self::new(
            EventsClient::new(events, config.events_url.as_str()),
            actors,
            repositories,
            store,
            state_store,
            errors,
        )
        .with_enrichment_policy(config.enrichment_policy())
        .with_schedule_policy(config.schedule_policy()))
    }

    pub fn with_enrichment_policy(mut self, policy: EnrichmentPolicy) -> Self {
        self.enrichment = policy;
        self
    }

    pub fn with_schedule_policy(mut self, policy: SchedulePolicy) -> Self {
        self.schedule = policy;
        self
    }

    /// Run one cycle. Never fails: every error ends in a backoff. The state is
    /// persisted unless it could not be loaded in the first place.
    pub async fn run_cycle(&self) -> CycleResult {
        let timer = timing_guard(CYCLE_DURATION, &[]);
        let now = Utc::now();
        let scheduler = Scheduler::new(self.state_store.as_ref(), self.errors.as_ref(), self.schedule);
        let mut stats = CycleStats::default();

        let (outcome, next_interval) = match scheduler.load_state().await {
            Ok(state) => match self.process(&scheduler, &state, &mut stats, now).await {
                Ok((outcome, scheduled)) => (outcome, scheduled.next_interval),
                Err(error) => self.fail(&scheduler, &state, &mut stats, error, now).await,
            },
            Err(error) => {
                // A state that could not be read is never written back.
                let error = CycleError::from(error);
                self.errors.report(&error, "cycle:exception");
                let interval = scheduler.decide_backoff(
                    &PollState::default(),
                    &mut stats,
                    error.reason(),
                    Some(error.to_string()),
                );
                (PollOutcome::Exception, interval)
            }
        };

        log_summary(&stats, &self.schedule);

        let seconds = next_interval.as_secs_f64();
        let labels = [("outcome".to_string(), outcome.as_str().to_string())];
        inc(CYCLES_TOTAL, &labels, 1);
        gauge(NEXT_POLL_INTERVAL, &[], seconds);
        histogram(SCHEDULED_INTERVAL, &labels, seconds);
        timer.label("outcome", outcome.as_str()).fin();

        CycleResult {
            outcome,
            next_interval,
            stats,
        }
    }

    async fn process(
        &self,
        scheduler: &Scheduler<'_>,
        state: &PollState,
        stats: &mut CycleStats,
        now: DateTime<Utc>,
    ) -> Result<(PollOutcome, Scheduled), CycleError> {
        let response = self.events.fetch(state.etag.as_deref()).await?;
        stats.record_fetch(&response);
        debug!(status = response.status, url = self.events.url(), "fetched events feed");

        let FetchResponse { status, json, .. } = response;
        let done = match status {
            200 => {
                self.ingest(json, stats, now).await?;
                let scheduled = scheduler
                    .apply_success(state, stats, ScheduleOutcome::Ok, now)
                    .await;
                (PollOutcome::Ok, scheduled)
            }
            304 => {
                let scheduled = scheduler
                    .apply_success(state, stats, ScheduleOutcome::NotModified, now)
                    .await;
                (PollOutcome::NotModified, scheduled)
            }
            429 => (
                PollOutcome::RateLimited,
                scheduler.apply_rate_limit(state, stats, now).await,
            ),
            500..=599 => {
                let reason = format!("server_error_{status}");
                let scheduled = scheduler
                    .apply_backoff(state, stats, &reason, None, now)
                    .await;
                (PollOutcome::BackingOff, scheduled)
            }
            _ => (
                PollOutcome::Error,
                scheduler.apply_unexpected(state, stats, now).await,
            ),
        };

        Ok(done)
    }

    /// Normalize the feed page, enrich it and persist the push events.
    async fn ingest(
        &self,
        json: Option<Value>,
        stats: &mut CycleStats,
        now: DateTime<Utc>,
    ) -> Result<(), CycleError> {
        let items = match json {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let rows = normalize(&items, now);
        stats.record_events(items.len(), rows.len());
        inc(EVENTS_RECEIVED, &[], to_u64(items.len()));
        inc(EVENTS_RETAINED, &[], to_u64(rows.len()));

        let enricher = Enricher::new(
            self.store.as_ref(),
            &self.actors,
            &self.repositories,
            self.errors.as_ref(),
            self.enrichment,
        );
        let enriched = enricher
            .enrich(rows, stats.rate_limit_remaining_hint())
            .await;
        stats.record_enrichment(enriched.actors, enriched.repos, enriched.api_calls_made);

        if !enriched.events.is_empty() {
            self.store.upsert_events(&enriched.events).await?;
        }
        Ok(())
    }

    async fn fail(
        &self,
        scheduler: &Scheduler<'_>,
        state: &PollState,
        stats: &mut CycleStats,
        error: CycleError,
        now: DateTime<Utc>,
    ) -> (PollOutcome, Duration) {
        let (outcome, context) = match error {
            CycleError::Fetch(_) => (PollOutcome::Timeout, "cycle:timeout"),
            CycleError::Store(_) => (PollOutcome::Exception, "cycle:exception"),
        };
        self.errors.report(&error, context);

        let scheduled = scheduler
            .apply_backoff(state, stats, error.reason(), Some(error.to_string()), now)
            .await;
        (outcome, scheduled.next_interval)
    }
}

fn to_u64(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}
