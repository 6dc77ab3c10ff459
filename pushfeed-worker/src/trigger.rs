use pushfeed_common::health::HealthHandle;
use tracing::info;

use crate::cycle::Poller;
use crate::summary::humanize;

/// Run poll cycles back to back, sleeping the scheduled interval in between.
/// Returns after a single cycle when `schedule_next` is false, or on ctrl-c.
pub async fn run(poller: &Poller, liveness: &HealthHandle, schedule_next: bool) -> usize {
    let mut cycles = 0;
    loop {
        let result = poller.run_cycle().await;
        cycles += 1;
        liveness.report_healthy();

        if !schedule_next {
            info!(
                outcome = result.outcome.as_str(),
                "scheduling disabled, not polling again"
            );
            return cycles;
        }

        info!(
            outcome = result.outcome.as_str(),
            "next poll in {}",
            humanize(result.next_interval)
        );
        tokio::select! {
            _ = tokio::time::sleep(result.next_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, stopping poller");
                return cycles;
            }
        }
    }
}
