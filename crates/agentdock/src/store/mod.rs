//! Record storage seam.
//!
//! The orchestration core treats persistent records as an external
//! collaborator: a key-value-like store keyed by session/project id. These
//! traits are that narrow interface; [`MemoryStore`] is the in-process
//! implementation used by the server and by tests. A durable backend only
//! needs to implement the same two traits.

mod memory;

pub use memory::MemoryStore;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::session::{Session, SessionStatus};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A registered repository a session can be created against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Path of the Git repository on disk.
    pub path: PathBuf,
    /// Model used when sessions don't pick one.
    pub default_model: Option<String>,
    /// Whether sessions default to container execution.
    pub docker_mode: bool,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            default_model: None,
            docker_mode: false,
            created_at: Utc::now(),
        }
    }
}

/// Project record access.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn insert_project(&self, project: Project) -> StoreResult<()>;
    async fn project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
}

/// Session record access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> StoreResult<()>;
    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>>;
    async fn list(&self) -> StoreResult<Vec<Session>>;
    async fn list_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Session>>;

    /// Overwrite the status. Transition legality is the caller's concern.
    async fn update_status(&self, id: Uuid, status: SessionStatus) -> StoreResult<()>;

    /// Record the container and volume backing a session.
    async fn set_container(&self, id: Uuid, container_id: &str, volume_name: &str)
    -> StoreResult<()>;

    /// Record the agent conversation id used for resuming with history.
    async fn set_history_id(&self, id: Uuid, history_id: &str) -> StoreResult<()>;

    /// Bump the last-activity timestamp.
    async fn touch_activity(&self, id: Uuid) -> StoreResult<()>;

    async fn remove(&self, id: Uuid) -> StoreResult<()>;

    /// Whether a session name is already used within a project.
    async fn name_exists(&self, project_id: Uuid, name: &str) -> StoreResult<bool>;
}
