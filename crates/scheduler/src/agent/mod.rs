//! Scheduling agents: one worker pool per scheduling strategy.
//!
//! Split into focused submodules:
//! - `core`: SchedulingAgent, its pool, budget accounting and driver thread
//! - `cadence`: when a scheduled component is due for another submission

mod cadence;
mod core;

pub use self::core::SchedulingAgent;
