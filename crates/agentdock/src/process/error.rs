//! Process supervision error types.

use thiserror::Error;
use uuid::Uuid;

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors that can occur while supervising agent processes.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A live process already exists for the session.
    #[error("a process is already running for session {0}")]
    AlreadyRunning(Uuid),

    /// No live process exists for the session.
    #[error("no process found for session {0}")]
    NotFound(Uuid),

    /// The agent binary could not be found.
    #[error("agent binary not found: {0}")]
    AgentNotFound(String),

    /// Launching the process failed.
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[from] std::io::Error),
}
