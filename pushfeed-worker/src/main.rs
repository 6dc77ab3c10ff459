//! Poll the GitHub public events feed and persist enriched push events.
use std::future::ready;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use pushfeed_common::health::HealthRegistry;
use pushfeed_common::metrics::{serve, setup_metrics_routes};
use pushfeed_worker::config::Config;
use pushfeed_worker::cycle::Poller;
use pushfeed_worker::error::{LogErrorSink, WorkerError};
use pushfeed_worker::store::PgStore;
use pushfeed_worker::trigger;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "pushfeed worker"
}

fn start_health_liveness_server(config: &Config, liveness: HealthRegistry) -> JoinHandle<()> {
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics on {}: {}", bind, e);
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env()?;

    let store = Arc::new(PgStore::new(&config.database_url, config.max_pg_connections).await?);
    if config.run_migrations {
        store.run_migrations().await?;
    }

    let liveness = HealthRegistry::new("liveness");
    let poller_liveness = liveness.register("poller".to_string(), config.liveness_deadline.0);
    start_health_liveness_server(&config, liveness);

    let poller = Poller::from_config(&config, store.clone(), store, Arc::new(LogErrorSink))?;

    let cycles = trigger::run(&poller, &poller_liveness, config.schedule_next).await;
    info!(cycles, "poller stopped");

    Ok(())
}
