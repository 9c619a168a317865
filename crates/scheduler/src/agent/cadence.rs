//! When a scheduled component is due for another submission.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cron::Schedule;
use millrace_core::{Connectable, SchedulingStrategy};

use crate::cron::{is_cron_due, parse_schedule};
use crate::error::SchedulerError;

pub(crate) enum Cadence {
    /// Due once `period` has passed since the last submission.
    Timer { period: Duration, next_run: Instant },
    /// Due while registered events are pending, one submission each.
    Event { pending: usize },
    /// Due when the schedule fired since the last submission. Missed
    /// fire times collapse into one submission.
    Cron { schedule: Schedule, last_fired: DateTime<Utc> },
}

impl Cadence {
    /// Cadence for a component scheduled at `now`.
    ///
    /// Timer-driven components are due immediately, cron-driven ones at
    /// the first fire time after `wall`.
    pub(crate) fn for_component(
        component: &Connectable,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        let settings = component.settings();
        match settings.strategy {
            SchedulingStrategy::TimerDriven => Ok(Cadence::Timer {
                period: settings.scheduling_period,
                next_run: now,
            }),
            SchedulingStrategy::EventDriven => Ok(Cadence::Event { pending: 0 }),
            SchedulingStrategy::CronDriven => {
                let expression = settings.cron_expression.as_deref().unwrap_or_default();
                Ok(Cadence::Cron {
                    schedule: parse_schedule(component.id(), expression)?,
                    last_fired: wall,
                })
            }
        }
    }

    pub(crate) fn is_due(&self, now: Instant, wall: DateTime<Utc>) -> bool {
        match self {
            Cadence::Timer { next_run, .. } => now >= *next_run,
            Cadence::Event { pending } => *pending > 0,
            Cadence::Cron { schedule, last_fired } => is_cron_due(schedule, wall, *last_fired),
        }
    }

    /// Record a submission made at `now`.
    pub(crate) fn fired(&mut self, now: Instant, wall: DateTime<Utc>) {
        match self {
            Cadence::Timer { period, next_run } => *next_run = now + *period,
            Cadence::Event { pending } => *pending = pending.saturating_sub(1),
            Cadence::Cron { last_fired, .. } => *last_fired = wall,
        }
    }

    /// Queue one event. Returns `false` for cadences that ignore events.
    pub(crate) fn register_event(&mut self) -> bool {
        match self {
            Cadence::Event { pending } => {
                *pending += 1;
                true
            }
            _ => false,
        }
    }
}
