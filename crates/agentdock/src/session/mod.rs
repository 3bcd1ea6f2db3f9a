//! Session lifecycle: data model, status state machine, and orchestration.

mod error;
mod models;
mod service;

pub use error::{SessionError, SessionResult};
pub use models::{Session, SessionStatus, session_branch, worktree_token};
pub use service::{
    BULK_MAX, BULK_MIN, BulkCreateRequest, BulkCreationOutcome, BulkFailure,
    CreateSessionRequest, SessionOrchestrator, TerminalTarget,
};
