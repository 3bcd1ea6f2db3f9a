//! agentdock: isolated, concurrent coding-agent sessions against a shared
//! Git repository.
//!
//! Each session owns a Git worktree and branch, an attached agent subprocess
//! (optionally a container), and a live terminal reachable over WebSocket.
//! The modules mirror that split: [`worktree`] provisions and tears down
//! worktrees, [`process`] supervises agent subprocesses, [`container`] drives
//! a Docker/Podman runtime, [`session`] owns the state machine composing the
//! three, and [`api`] exposes the HTTP/WebSocket surface.

pub mod api;
pub mod config;
pub mod container;
pub mod process;
pub mod session;
pub mod store;
pub mod worktree;
