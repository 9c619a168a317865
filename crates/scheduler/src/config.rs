use std::env;
use std::time::Duration;

use millrace_core::SchedulingStrategy;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Scheduler configuration, supplied by the surrounding engine or read
/// from `MILLRACE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Max pool size for timer-driven components.
    #[serde(default = "default_timer_driven_threads")]
    pub timer_driven_threads: usize,
    /// Max pool size for event-driven components.
    #[serde(default = "default_event_driven_threads")]
    pub event_driven_threads: usize,
    /// Max pool size for cron-driven components.
    #[serde(default = "default_cron_driven_threads")]
    pub cron_driven_threads: usize,
    /// Cooldown applied after a component fails unexpectedly.
    #[serde(default = "default_administrative_yield")]
    pub administrative_yield_millis: u64,
    /// Sleep between two passes of an agent's cadence driver.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_millis: u64,
}

fn default_timer_driven_threads() -> usize { 10 }
fn default_event_driven_threads() -> usize { 5 }
fn default_cron_driven_threads() -> usize { 2 }
fn default_administrative_yield() -> u64 { 30_000 }
fn default_tick_interval() -> u64 { 10 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timer_driven_threads: default_timer_driven_threads(),
            event_driven_threads: default_event_driven_threads(),
            cron_driven_threads: default_cron_driven_threads(),
            administrative_yield_millis: default_administrative_yield(),
            tick_interval_millis: default_tick_interval(),
        }
    }
}

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, SchedulerError> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SchedulerError::Config(format!("{key}: cannot parse '{raw}'"))),
        None => Ok(None),
    }
}

impl SchedulerConfig {
    /// Build config from defaults overlaid with `MILLRACE_*` env vars
    /// (a `.env` file is loaded first if present).
    pub fn from_env() -> Result<Self, SchedulerError> {
        load_dotenv();
        let mut config = Self::default();
        if let Some(v) = env_parse("MILLRACE_TIMER_DRIVEN_THREADS")? {
            config.timer_driven_threads = v;
        }
        if let Some(v) = env_parse("MILLRACE_EVENT_DRIVEN_THREADS")? {
            config.event_driven_threads = v;
        }
        if let Some(v) = env_parse("MILLRACE_CRON_DRIVEN_THREADS")? {
            config.cron_driven_threads = v;
        }
        if let Some(v) = env_parse("MILLRACE_ADMINISTRATIVE_YIELD_MILLIS")? {
            config.administrative_yield_millis = v;
        }
        if let Some(v) = env_parse("MILLRACE_TICK_INTERVAL_MILLIS")? {
            config.tick_interval_millis = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for strategy in SchedulingStrategy::ALL {
            if self.threads_for(strategy) == 0 {
                return Err(SchedulerError::Config(format!(
                    "{strategy} thread count must be at least 1"
                )));
            }
        }
        Ok(())
    }

    /// Configured pool size for a strategy.
    pub fn threads_for(&self, strategy: SchedulingStrategy) -> usize {
        match strategy {
            SchedulingStrategy::TimerDriven => self.timer_driven_threads,
            SchedulingStrategy::EventDriven => self.event_driven_threads,
            SchedulingStrategy::CronDriven => self.cron_driven_threads,
        }
    }

    pub fn administrative_yield(&self) -> Duration {
        Duration::from_millis(self.administrative_yield_millis)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_millis)
    }
}
