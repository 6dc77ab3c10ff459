use std::error::Error as StdError;

use thiserror::Error;
use tracing::error;

use crate::metrics_consts::HANDLED_ERRORS;
use crate::store::StoreError;

/// The feed could not be reached at all. Routed to the backoff path.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out or failed to connect fetching {url}: {error}")]
    Transport { url: String, error: reqwest::Error },
}

/// Failures inside one kind's enrichment run. Caught by the enricher.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("{kind} enrichment failed: {error}")]
    Store {
        kind: &'static str,
        error: StoreError,
    },
}

/// Failures that end a poll cycle early. Caught by the poller and turned into a backoff.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CycleError {
    /// Backoff reason recorded in the poll state.
    pub fn reason(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "timeout",
            CycleError::Store(_) => "exception",
        }
    }
}

/// Startup failures, surfaced from main.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("failed to build http client: {0}")]
    HttpClientError(#[from] reqwest::Error),
    #[error("storage unavailable: {0}")]
    StoreError(#[from] StoreError),
}

/// Receives errors the poller recovered from, tagged with where they happened.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &(dyn StdError + 'static), context: &'static str);
}

/// Logs handled errors and counts them by context.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, error: &(dyn StdError + 'static), context: &'static str) {
        metrics::counter!(HANDLED_ERRORS, &[("context", context)]).increment(1);
        error!(context, handled = true, "{}", error);
    }
}
