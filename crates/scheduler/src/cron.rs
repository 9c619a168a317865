//! Cron parsing and due-check helpers for cron-driven components.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use millrace_core::ComponentId;

use crate::error::SchedulerError;

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for seconds.
///
/// The `cron` crate requires `sec min hour day-of-month month day-of-week`;
/// operators usually write the 5-field form without seconds.
pub(crate) fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

/// Parse the cron expression configured on `component`.
pub fn parse_schedule(component: &ComponentId, expression: &str) -> Result<Schedule, SchedulerError> {
    Schedule::from_str(&normalize_cron(expression)).map_err(|e| SchedulerError::InvalidSchedule {
        component: component.clone(),
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Check if a cron schedule fired in `(last_fired, now]`.
pub(crate) fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, last_fired: DateTime<Utc>) -> bool {
    match schedule.after(&last_fired).next() {
        Some(next) => next <= now,
        None => false,
    }
}
