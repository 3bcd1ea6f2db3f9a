//! Canonical wire types for agentdock.
//!
//! Two surfaces live here: the JSON frame protocol spoken over terminal
//! WebSocket connections, and the event stream emitted by supervised agent
//! processes. Both are consumed by the server crate and by frontend clients,
//! so they are kept free of any server-side dependencies.

pub mod events;
pub mod terminal;

pub use events::{PauseReason, ProcessEvent, ProcessEventPayload, ProcessStatus};
pub use terminal::{ClientFrame, ResizePayload, ServerFrame};
