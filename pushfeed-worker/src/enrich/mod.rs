use tracing::debug;

use crate::budget::{Budget, RATE_LIMIT_THRESHOLD};
use crate::error::ErrorSink;
use crate::fetch::ResourceClient;
use crate::stats::EnrichmentStats;
use crate::store::Store;
use crate::types::{EnrichmentRow, EventAttributes};

pub mod actors;
pub mod pipeline;
pub mod repos;

pub use actors::Actors;
pub use pipeline::{enrich_kind, ResourceKind};
pub use repos::Repositories;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentPolicy {
    pub rate_limit_threshold: i64,
    pub max_fetch_per_batch: usize,
    /// Stored resources older than this are refreshed.
    pub refresh_after: chrono::Duration,
}

impl Default for EnrichmentPolicy {
    fn default() -> Self {
        Self {
            rate_limit_threshold: RATE_LIMIT_THRESHOLD,
            max_fetch_per_batch: 50,
            refresh_after: chrono::Duration::hours(24),
        }
    }
}

/// Events ready to persist, and what enrichment cost. A kind's stats are
/// absent when it was skipped or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub events: Vec<EventAttributes>,
    pub api_calls_made: usize,
    pub actors: Option<EnrichmentStats>,
    pub repos: Option<EnrichmentStats>,
}

/// Resolves actors, then repositories, for a batch of rows under one shared call budget.
pub struct Enricher<'a> {
    store: &'a dyn Store,
    actors: &'a ResourceClient,
    repositories: &'a ResourceClient,
    errors: &'a dyn ErrorSink,
    policy: EnrichmentPolicy,
}

impl<'a> Enricher<'a> {
    pub fn new(
        store: &'a dyn Store,
        actors: &'a ResourceClient,
        repositories: &'a ResourceClient,
        errors: &'a dyn ErrorSink,
        policy: EnrichmentPolicy,
    ) -> Self {
        Self {
            store,
            actors,
            repositories,
            errors,
            policy,
        }
    }

    /// Never fails: a kind that errors is reported and ends spending for the
    /// cycle, while whatever earlier kinds resolved is kept.
    pub async fn enrich(
        &self,
        mut rows: Vec<EnrichmentRow>,
        rate_limit_remaining: Option<i64>,
    ) -> EnrichmentOutcome {
        let mut outcome = EnrichmentOutcome {
            events: Vec::new(),
            api_calls_made: 0,
            actors: None,
            repos: None,
        };
        if rows.is_empty() {
            return outcome;
        }

        let mut budget = Budget::from_remaining(rate_limit_remaining, self.policy.rate_limit_threshold);
        debug!(?budget, rows = rows.len(), "enriching push events");

        if !budget.is_exhausted() {
            let (left, stats) = self
                .run_kind(&Actors, self.actors, &mut rows, budget, "enricher:actors")
                .await;
            budget = left;
            outcome.actors = stats;
        }

        if !budget.is_exhausted() {
            let (_, stats) = self
                .run_kind(
                    &Repositories,
                    self.repositories,
                    &mut rows,
                    budget,
                    "enricher:repositories",
                )
                .await;
            outcome.repos = stats;
        }

        outcome.api_calls_made = [outcome.actors, outcome.repos]
            .iter()
            .flatten()
            .map(|stats| stats.attempted)
            .sum();
        outcome.events = rows.into_iter().map(EventAttributes::from).collect();
        outcome
    }

    async fn run_kind<K: ResourceKind>(
        &self,
        kind: &K,
        client: &ResourceClient,
        rows: &mut [EnrichmentRow],
        budget: Budget,
        context: &'static str,
    ) -> (Budget, Option<EnrichmentStats>) {
        match enrich_kind(kind, client, self.store, rows, budget, &self.policy).await {
            Ok(stats) => (budget.spend(stats.attempted), Some(stats)),
            Err(error) => {
                self.errors.report(&error, context);
                (Budget::Bounded(0), None)
            }
        }
    }
}
