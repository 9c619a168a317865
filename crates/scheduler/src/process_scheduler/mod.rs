//! The scheduler facade the surrounding engine drives.

mod core;

pub use self::core::ProcessScheduler;
