pub mod backoff;
pub mod health;
pub mod metrics;
