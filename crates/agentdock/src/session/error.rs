//! Session orchestration error types.

use thiserror::Error;
use uuid::Uuid;

use crate::container::ContainerError;
use crate::process::ProcessError;
use crate::store::StoreError;
use crate::worktree::WorktreeError;

use super::models::SessionStatus;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session orchestrator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("project not found: {0}")]
    ProjectNotFound(Uuid),

    #[error("session not found: {0}")]
    NotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("count must be between {min} and {max}, got {got}")]
    InvalidCount { got: u32, min: u32, max: u32 },

    #[error("session {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: SessionStatus,
        expected: &'static str,
    },

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
