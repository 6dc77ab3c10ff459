pub mod budget;
pub mod config;
pub mod cycle;
pub mod enrich;
pub mod error;
pub mod fetch;
pub mod metrics_consts;
pub mod normalize;
pub mod schedule;
pub mod stats;
pub mod store;
pub mod summary;
pub mod trigger;
pub mod types;
