//! Frame protocol for terminal WebSocket connections.
//!
//! Frames are JSON text messages tagged by a `type` field. Clients send
//! `input` and `resize`; the server sends `data`, a single `exit` right
//! before closing, and `error` for setup failures.

use serde::{Deserialize, Serialize};

/// Terminal dimensions carried by a resize frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizePayload {
    pub cols: u16,
    pub rows: u16,
}

impl ResizePayload {
    /// Upper bound accepted for either dimension.
    pub const MAX_DIM: u16 = 1000;

    /// Whether both dimensions are within the accepted range.
    pub fn is_valid(&self) -> bool {
        (1..=Self::MAX_DIM).contains(&self.cols) && (1..=Self::MAX_DIM).contains(&self.rows)
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keystrokes, written verbatim to the PTY.
    Input { data: String },
    /// Terminal resize request. Out-of-range dimensions are ignored.
    Resize { data: ResizePayload },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// PTY output.
    Data { content: String },
    /// The PTY process exited. Sent once, immediately before close.
    Exit {
        #[serde(rename = "exitCode")]
        exit_code: i32,
        signal: Option<i32>,
    },
    /// Terminal setup failed.
    Error { message: String },
}
