use std::time::Instant;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
/// This function is intended to take a Router as returned by `setup_metrics_routes`, potentially with more routes added by the caller.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Add the prometheus endpoint to a router, should be called last.
pub fn setup_metrics_routes(router: Router) -> Router {
    let recorder_handle = setup_metrics_recorder();

    router.route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    // Histograms are recorded in seconds. A poll cycle spans a feed fetch plus up
    // to two batches of resource fetches.
    const SECONDS_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];
    // Scheduled intervals run from the default poll up to a full rate limit window.
    const INTERVAL_BUCKETS: &[f64] = &[30.0, 60.0, 120.0, 300.0, 900.0, 1800.0, 3600.0];

    PrometheusBuilder::new()
        .set_buckets(SECONDS_BUCKETS)
        .expect("histogram buckets must not be empty")
        .set_buckets_for_metric(
            Matcher::Suffix("interval_seconds".to_string()),
            INTERVAL_BUCKETS,
        )
        .expect("histogram buckets must not be empty")
        .install_recorder()
        .expect("failed to install metrics recorder")
}

// Shorthand for common metric types
pub fn inc(name: &'static str, labels: &[(String, String)], value: u64) {
    metrics::counter!(name, labels).increment(value);
}

pub fn gauge(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::gauge!(name, labels).set(value);
}

pub fn histogram(name: &'static str, labels: &[(String, String)], value: f64) {
    metrics::histogram!(name, labels).record(value);
}

/// Records the seconds between creation and drop as a histogram entry.
pub struct TimingGuard {
    name: &'static str,
    labels: Vec<(String, String)>,
    start: Instant,
}

pub fn timing_guard(name: &'static str, labels: &[(String, String)]) -> TimingGuard {
    TimingGuard {
        name,
        labels: labels.to_vec(),
        start: Instant::now(),
    }
}

impl TimingGuard {
    /// Attach a label known only once the timed work is done, like its outcome.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn fin(self) {}
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        histogram(self.name, &self.labels, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_guard_collects_labels() {
        let guard = timing_guard("cycle_duration_seconds", &[("source".into(), "events".into())])
            .label("outcome", "ok");
        assert_eq!(
            guard.labels,
            vec![
                ("source".to_string(), "events".to_string()),
                ("outcome".to_string(), "ok".to_string()),
            ]
        );
        guard.fin();
    }
}
