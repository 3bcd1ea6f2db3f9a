//! Container runtime error types.

use thiserror::Error;

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur during container operations.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container runtime is not reachable.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Building the session image failed.
    #[error("image build failed: {0}")]
    ImageBuild(String),

    /// The referenced repository does not resolve.
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// A container already exists for the session.
    #[error("container already exists for session {0}")]
    AlreadyExists(String),

    /// The container command failed.
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Container was not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
