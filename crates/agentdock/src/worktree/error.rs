//! Worktree error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for worktree operations.
pub type WorktreeResult<T> = Result<T, WorktreeError>;

/// Errors that can occur while provisioning or removing worktrees.
#[derive(Debug, Error)]
pub enum WorktreeError {
    /// The target path is not inside a Git repository.
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    /// The worktree directory already exists.
    #[error("worktree path already exists: {0}")]
    PathExists(PathBuf),

    /// The branch already exists in the repository.
    #[error("branch already exists: {0}")]
    BranchExists(String),

    /// No worktree is registered for the token.
    #[error("no worktree for token: {0}")]
    MissingWorktree(String),

    /// A git command exited non-zero.
    #[error("git {command} failed: {message}")]
    GitCommand { command: String, message: String },

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
