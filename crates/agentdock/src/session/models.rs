//! Session data model and status state machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session status.
///
/// Transitions are monotonic per [`SessionStatus::can_transition_to`]:
/// `initializing → running ⇄ waiting_input → completed`, `error` reachable
/// from any non-terminal state, and `stopped ⇄ running` via explicit
/// stop/resume. `completed` is terminal; `error` can only be left through an
/// explicit resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Worktree provisioned, agent not yet launched.
    Initializing,
    /// The agent is working.
    Running,
    /// The agent is blocked on a permission or input request.
    WaitingInput,
    /// The agent finished successfully.
    Completed,
    /// The session was paused; worktree and history are kept.
    Stopped,
    /// Provisioning, launch, or the agent itself failed.
    Error,
}

impl SessionStatus {
    /// States a session can never leave through runtime events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    /// Whether a live process or container is expected for this status.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::Initializing | SessionStatus::Running | SessionStatus::WaitingInput
        )
    }

    /// Whether moving from `self` to `to` is a legal transition.
    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (Initializing, Running | Stopped | Error) => true,
            (Running, WaitingInput | Completed | Stopped | Error) => true,
            (WaitingInput, Running | Completed | Stopped | Error) => true,
            // Explicit resume; a failed resume lands back in error.
            (Stopped, Running | Error) => true,
            (Error, Running) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Initializing => write!(f, "initializing"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::WaitingInput => write!(f, "waiting_input"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(SessionStatus::Initializing),
            "running" => Ok(SessionStatus::Running),
            "waiting_input" => Ok(SessionStatus::WaitingInput),
            "completed" => Ok(SessionStatus::Completed),
            "stopped" => Ok(SessionStatus::Stopped),
            "error" => Ok(SessionStatus::Error),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

/// One coding-agent session bound to one worktree and one process/container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Display name, unique within the project.
    pub name: String,
    pub status: SessionStatus,
    /// Model identifier passed to the agent, if any.
    pub model: Option<String>,
    /// Path of the session's Git worktree.
    pub worktree_path: PathBuf,
    /// Branch checked out in the worktree.
    pub branch_name: String,
    /// Whether the agent runs inside a container.
    pub docker_mode: bool,
    /// Container ID once started (container mode only).
    pub container_id: Option<String>,
    /// Volume backing the container workspace (container mode only).
    pub volume_name: Option<String>,
    /// Agent conversation ID, captured for `--resume`.
    pub history_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Session-unique token used for worktree directory and branch names.
///
/// Derived from the session id rather than a counter or timestamp so that
/// concurrent creations against the same repository can never collide.
pub fn worktree_token(id: Uuid) -> String {
    let hex = id.simple().to_string();
    format!("session-{}", &hex[..12])
}

/// Branch name for a session token.
pub fn session_branch(token: &str) -> String {
    format!("session/{token}")
}
