use std::time::Duration;

/// Exponential backoff over consecutive failed polls.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Factor applied to the previous interval for every further failure.
    pub backoff_coefficient: u32,
    /// The interval after the first failure.
    pub initial_interval: Duration,
    /// The maximum possible interval between polls while backing off.
    pub maximum_interval: Duration,
}

impl BackoffPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: Duration,
        maximum_interval: Duration,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Interval for the first failure after a healthy poll.
    pub fn first_interval(&self) -> Duration {
        self.initial_interval.min(self.maximum_interval)
    }

    /// Interval for a failure that follows another failure. A zero previous
    /// interval counts as the initial one.
    pub fn next_interval(&self, previous: Duration) -> Duration {
        let previous = if previous.is_zero() {
            self.initial_interval
        } else {
            previous
        };

        previous
            .saturating_mul(self.backoff_coefficient)
            .min(self.maximum_interval)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: Duration::from_secs(30),
            maximum_interval: Duration::from_secs(900),
        }
    }
}
