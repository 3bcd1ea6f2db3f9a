//! In-memory record store backed by concurrent maps.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::session::{Session, SessionStatus};

use super::{Project, ProjectStore, SessionStore, StoreError, StoreResult};

/// In-process implementation of [`ProjectStore`] and [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: DashMap<Uuid, Project>,
    sessions: DashMap<Uuid, Session>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<F>(&self, id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Session),
    {
        let mut entry = self.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        f(&mut entry);
        entry.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn insert_project(&self, project: Project) -> StoreResult<()> {
        if self
            .projects
            .iter()
            .any(|existing| existing.name == project.name)
        {
            return Err(StoreError::Conflict(format!(
                "project name already exists: {}",
                project.name
            )));
        }
        self.projects.insert(project.id, project);
        Ok(())
    }

    async fn project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.projects.get(&id).map(|p| p.clone()))
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        let mut projects: Vec<Project> = self.projects.iter().map(|p| p.clone()).collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: Session) -> StoreResult<()> {
        if self.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "session already exists: {}",
                session.id
            )));
        }
        self.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self.sessions.iter().map(|s| s.clone()).collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn list_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.project_id == project_id)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn update_status(&self, id: Uuid, status: SessionStatus) -> StoreResult<()> {
        self.mutate(id, |session| session.status = status)
    }

    async fn set_container(
        &self,
        id: Uuid,
        container_id: &str,
        volume_name: &str,
    ) -> StoreResult<()> {
        self.mutate(id, |session| {
            session.container_id = Some(container_id.to_string());
            session.volume_name = Some(volume_name.to_string());
        })
    }

    async fn set_history_id(&self, id: Uuid, history_id: &str) -> StoreResult<()> {
        self.mutate(id, |session| {
            session.history_id = Some(history_id.to_string())
        })
    }

    async fn touch_activity(&self, id: Uuid) -> StoreResult<()> {
        self.mutate(id, |session| session.last_activity_at = Utc::now())
    }

    async fn remove(&self, id: Uuid) -> StoreResult<()> {
        self.sessions
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn name_exists(&self, project_id: Uuid, name: &str) -> StoreResult<bool> {
        Ok(self
            .sessions
            .iter()
            .any(|s| s.project_id == project_id && s.name == name))
    }
}
