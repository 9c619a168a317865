use thiserror::Error;

/// Failure raised by a component's processing logic during one invocation.
///
/// The distinction matters to the scheduler: a [`TriggerError::Process`] is an
/// expected, recoverable condition, while anything else is treated as a bug
/// and the component is administratively yielded.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("processing error: {0}")]
    Process(String),

    #[error("unexpected failure: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl TriggerError {
    /// Build an expected processing error.
    pub fn process(msg: impl Into<String>) -> Self {
        TriggerError::Process(msg.into())
    }

    /// Whether this is an expected processing error.
    pub fn is_process(&self) -> bool {
        matches!(self, TriggerError::Process(_))
    }
}

/// Errors surfaced by a process session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("session already closed")]
    Closed,
}
