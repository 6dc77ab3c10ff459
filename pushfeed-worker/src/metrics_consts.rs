pub const CYCLES_TOTAL: &str = "pushfeed_poll_cycles_total";
pub const CYCLE_DURATION: &str = "pushfeed_poll_cycle_duration_seconds";
pub const EVENTS_RECEIVED: &str = "pushfeed_events_received_total";
pub const EVENTS_RETAINED: &str = "pushfeed_push_events_retained_total";
pub const RESOURCE_FETCHES: &str = "pushfeed_resource_fetches_total";
pub const HANDLED_ERRORS: &str = "pushfeed_handled_errors_total";
pub const NEXT_POLL_INTERVAL: &str = "pushfeed_next_poll_interval_seconds";
pub const SCHEDULED_INTERVAL: &str = "pushfeed_scheduled_interval_seconds";
