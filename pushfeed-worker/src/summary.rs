use std::time::Duration;

use tracing::info;

use crate::schedule::SchedulePolicy;
use crate::stats::{CycleStats, EnrichmentStats, ScheduleOutcome};

/// Log one multi-line summary of a finished cycle.
pub fn log_summary(stats: &CycleStats, policy: &SchedulePolicy) {
    info!("{}", render_summary(stats, policy));
}

pub fn render_summary(stats: &CycleStats, policy: &SchedulePolicy) -> String {
    let mut lines = vec![headline(stats)];

    if let Some(limit) = stats.rate_limit_limit() {
        lines.push(format!(
            "  Rate limit: {limit}/hour, threshold={}",
            policy.rate_limit_threshold
        ));
    }
    if stats.events_received > 0 || stats.events_count > 0 {
        lines.push(events_line(stats));
    }
    if let Some(actors) = &stats.actor_stats {
        lines.push(enrichment_line("Actors", actors));
    }
    if let Some(repos) = &stats.repo_stats {
        lines.push(enrichment_line("Repos", repos));
    }
    if stats.rate_limit_remaining_hint().is_some() {
        lines.extend(api_budget_lines(stats));
    }
    lines.push(next_poll_line(stats, policy.default_interval));

    lines.join("\n")
}

fn headline(stats: &CycleStats) -> String {
    let outcome = stats
        .schedule
        .as_ref()
        .map(|s| s.outcome.as_str())
        .unwrap_or("unscheduled");

    let mut details = Vec::new();
    if let Some(schedule) = &stats.schedule {
        match (&schedule.error_message, &schedule.reason) {
            (Some(message), _) => details.push(message.clone()),
            (None, Some(reason)) => details.push(reason.clone()),
            (None, None) => {}
        }
    }
    if let Some(status) = stats.status {
        if !matches!(outcome, "ok" | "not_modified") {
            details.push(format!("status={status}"));
        }
    }
    if let Some(request_id) = stats
        .header("x-github-request-id")
        .filter(|id| !id.trim().is_empty())
    {
        details.push(format!("request_id={request_id}"));
    }
    if stats.decode_error {
        details.push("decode_error".to_string());
    }

    if details.is_empty() {
        format!("GitHub events poll {outcome}")
    } else {
        format!("GitHub events poll {outcome}: {}", details.join(", "))
    }
}

fn events_line(stats: &CycleStats) -> String {
    let received = stats.events_received;
    let kept = stats.events_count;
    let skipped = received.saturating_sub(kept);

    let mut parts = vec![format!("{received} received")];
    if kept > 0 {
        parts.push(format!("{kept} push events"));
    }
    if skipped > 0 {
        parts.push(format!("{skipped} skipped"));
    }
    format!("  Events:     {}", parts.join(", "))
}

fn enrichment_line(label: &str, stats: &EnrichmentStats) -> String {
    let outcomes: Vec<String> = [
        (stats.fetched, "ok"),
        (stats.not_modified, "not_modified"),
        (stats.decode_error, "decode_error"),
        (stats.mismatched, "mismatched"),
        (stats.failed, "failed"),
    ]
    .iter()
    .filter(|(count, _)| *count > 0)
    .map(|(count, name)| format!("{count} {name}"))
    .collect();

    let detail = if outcomes.is_empty() {
        String::new()
    } else {
        format!(" ({})", outcomes.join(", "))
    };
    let label = format!("{label}:");
    format!(
        "  {label:<12}{} unique, {} fetched{detail}",
        stats.unique_ids, stats.attempted
    )
}

fn api_budget_lines(stats: &CycleStats) -> Vec<String> {
    let actor_calls = stats.actor_stats.map(|s| s.attempted).unwrap_or(0);
    let repo_calls = stats.repo_stats.map(|s| s.attempted).unwrap_or(0);

    let mut breakdown = vec!["events=1".to_string()];
    if actor_calls > 0 {
        breakdown.push(format!("actors={actor_calls}"));
    }
    if repo_calls > 0 {
        breakdown.push(format!("repos={repo_calls}"));
    }

    vec![
        format!("  API avail:  {}", stats.rate_limit_before()),
        format!(
            "  API used:   {} ({})",
            stats.total_api_calls(),
            breakdown.join(", ")
        ),
        format!("  API left:   {}", stats.rate_limit_remaining()),
    ]
}

fn next_poll_line(stats: &CycleStats, default_interval: Duration) -> String {
    let Some(schedule) = &stats.schedule else {
        return "  Next poll:  not scheduled".to_string();
    };

    let note = if schedule.rate_limited {
        let reset = match schedule.reset_in {
            Some(reset) if reset > 0 => {
                format!("resets in {}", humanize(Duration::from_secs(reset)))
            }
            _ => "near limit".to_string(),
        };
        Some(format!("waiting for rate limit, {reset}"))
    } else if schedule.outcome == ScheduleOutcome::Backoff {
        Some("backoff".to_string())
    } else {
        schedule
            .server_interval
            .filter(|seconds| *seconds > default_interval.as_secs())
            .map(|seconds| format!("server requested {seconds}s"))
    };

    match note {
        Some(note) => format!("  Next poll:  in {} ({note})", humanize(schedule.interval)),
        None => format!("  Next poll:  in {}", humanize(schedule.interval)),
    }
}

/// "1 hour, 2 minutes and 5 seconds"
pub fn humanize(interval: Duration) -> String {
    let total = interval.as_secs();
    let units = [
        (total / 3600, "hour"),
        (total % 3600 / 60, "minute"),
        (total % 60, "second"),
    ];
    let parts: Vec<String> = units
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| match value {
            1 => format!("1 {unit}"),
            n => format!("{n} {unit}s"),
        })
        .collect();

    match parts.as_slice() {
        [] => "0 seconds".to_string(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} and {}", rest.join(", "), last),
    }
}
