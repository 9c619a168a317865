//! Execution scheduler for dataflow components.
//!
//! Decides on every tick whether a processor, port or funnel may run, invokes
//! it once or in a time-boxed batch, contains its failures and reports
//! per-execution statistics. [`ProcessScheduler`] is the entry point; it owns
//! one [`SchedulingAgent`] (and worker pool) per scheduling strategy.

pub mod agent;
pub mod availability;
pub mod config;
pub mod cron;
pub mod eligibility;
pub mod error;
pub mod lifecycle;
pub mod process_scheduler;
pub mod schedule_state;
pub mod services;
pub mod stats;
pub mod task;

#[cfg(test)]
mod fixtures;

pub use agent::SchedulingAgent;
pub use availability::RelationshipAvailabilityOracle;
pub use config::{load_dotenv, SchedulerConfig};
pub use eligibility::{Ineligible, Pass};
pub use error::SchedulerError;
pub use lifecycle::LifecycleHook;
pub use process_scheduler::ProcessScheduler;
pub use schedule_state::{Phase, ScheduleState};
pub use services::EngineServices;
pub use stats::{ComponentStatistics, EventRecorder, InMemoryEventRecorder, InvocationStats};
pub use task::{ContinualRunTask, LoopExit, TaskOutcome};
