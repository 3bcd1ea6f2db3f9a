//! Events emitted by a supervised agent process.
//!
//! Events are ephemeral signals: the orchestrator routes them into the
//! session state machine and observers can mirror them to clients. They are
//! not a persistence format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a session's agent process was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// The session saw no activity for longer than the configured timeout.
    IdleTimeout,
    /// The server is shutting down and parks all live sessions.
    ServerShutdown,
    /// An operator asked for the session to stop.
    Manual,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::IdleTimeout => write!(f, "idle_timeout"),
            PauseReason::ServerShutdown => write!(f, "server_shutdown"),
            PauseReason::Manual => write!(f, "manual"),
        }
    }
}

/// Coarse process state reported through `StatusChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// The agent is actively producing output.
    Running,
    /// The agent is blocked waiting for a decision or more input.
    WaitingInput,
    /// The process was deliberately suspended.
    Paused { reason: PauseReason },
}

/// An event from a supervised agent process, with routing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// Which session this event belongs to.
    pub session_id: Uuid,

    /// The event payload.
    #[serde(flatten)]
    pub payload: ProcessEventPayload,
}

impl ProcessEvent {
    pub fn new(session_id: Uuid, payload: ProcessEventPayload) -> Self {
        Self {
            session_id,
            payload,
        }
    }
}

/// All event types, tagged by the `event` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcessEventPayload {
    /// A chunk of process output (stdout or stderr).
    Output { content: String },

    /// The agent asked for permission to perform an action.
    PermissionRequest {
        request_id: String,
        description: String,
    },

    /// The process moved to a new coarse state.
    StatusChanged { status: ProcessStatus },

    /// The process exited. `code` is `None` when killed by a signal.
    Exit {
        code: Option<i32>,
        signal: Option<i32>,
    },
}
