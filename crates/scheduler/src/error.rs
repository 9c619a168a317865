use millrace_core::{ComponentId, SessionError, SchedulingStrategy};
use thiserror::Error;

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid state for {component}: {reason}")]
    InvalidState {
        component: ComponentId,
        reason: String,
    },

    #[error("failed to commit batched session for {component}: {source}")]
    Commit {
        component: ComponentId,
        #[source]
        source: SessionError,
    },

    #[error("failed to build {strategy} thread pool: {source}")]
    ThreadPool {
        strategy: SchedulingStrategy,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("failed to spawn {strategy} driver thread: {source}")]
    Spawn {
        strategy: SchedulingStrategy,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cron expression '{expression}' for {component}: {reason}")]
    InvalidSchedule {
        component: ComponentId,
        expression: String,
        reason: String,
    },

    #[error("unknown component: {0}")]
    UnknownComponent(ComponentId),

    #[error("config error: {0}")]
    Config(String),
}

impl SchedulerError {
    pub(crate) fn invalid_state(component: &ComponentId, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidState {
            component: component.clone(),
            reason: reason.into(),
        }
    }
}
