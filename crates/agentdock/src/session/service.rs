//! Session orchestration.
//!
//! The orchestrator owns the session state machine. It composes the worktree
//! manager with either the process supervisor or the container orchestrator
//! to create, bulk-create, stop, resume, and delete sessions, and it is the
//! single consumer of process events, applying them to session records in
//! arrival order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use agentdock_protocol::{PauseReason, ProcessEvent, ProcessEventPayload, ProcessStatus};

use crate::container::{ContainerOrchestrator, ContainerSession, RepositorySource};
use crate::process::{AgentSupervisor, ProcessError, StartOptions};
use crate::store::{Project, ProjectStore, SessionStore, StoreError};
use crate::worktree::WorktreeOps;

use super::error::{SessionError, SessionResult};
use super::models::{Session, SessionStatus, session_branch, worktree_token};

/// Smallest accepted bulk count.
pub const BULK_MIN: u32 = 2;
/// Largest accepted bulk count.
pub const BULK_MAX: u32 = 10;

/// Request to create one session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Display name; auto-generated when omitted.
    pub name: Option<String>,
    /// Initial prompt delivered to the agent.
    pub prompt: String,
    pub model: Option<String>,
    /// Overrides the project default when set.
    pub docker_mode: Option<bool>,
}

/// Request to create several sessions from one template.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkCreateRequest {
    pub name: String,
    pub prompt: String,
    pub count: u32,
    pub model: Option<String>,
}

/// Result of a bulk creation: the sessions that made it, in request order,
/// plus the first failure when the batch ended early.
#[derive(Debug, Clone, Serialize)]
pub struct BulkCreationOutcome {
    pub sessions: Vec<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<BulkFailure>,
}

/// The item a bulk creation stopped at and why.
#[derive(Debug, Clone, Serialize)]
pub struct BulkFailure {
    /// 1-based index of the failed item.
    pub index: u32,
    pub reason: String,
}

/// Where a terminal bridge should attach for a session.
#[derive(Debug, Clone)]
pub enum TerminalTarget {
    /// Spawn a shell in the session worktree.
    Host { cwd: PathBuf },
    /// Exec a shell inside the session container.
    Container {
        program: String,
        container_id: String,
    },
}

enum Launched {
    Process,
    Container(ContainerSession),
}

/// Owner of session lifecycle and state.
pub struct SessionOrchestrator {
    sessions: Arc<dyn SessionStore>,
    projects: Arc<dyn ProjectStore>,
    worktrees: Arc<dyn WorktreeOps>,
    supervisor: Arc<dyn AgentSupervisor>,
    containers: Option<Arc<ContainerOrchestrator>>,
    default_model: Option<String>,
    idle_timeout: Option<Duration>,
}

impl SessionOrchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        projects: Arc<dyn ProjectStore>,
        worktrees: Arc<dyn WorktreeOps>,
        supervisor: Arc<dyn AgentSupervisor>,
        containers: Option<Arc<ContainerOrchestrator>>,
        default_model: Option<String>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            sessions,
            projects,
            worktrees,
            supervisor,
            containers,
            default_model,
            idle_timeout,
        }
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    async fn require(&self, id: Uuid) -> SessionResult<Session> {
        self.sessions
            .get(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    pub async fn get(&self, id: Uuid) -> SessionResult<Session> {
        self.require(id).await
    }

    pub async fn list(&self) -> SessionResult<Vec<Session>> {
        Ok(self.sessions.list().await?)
    }

    pub async fn list_project(&self, project_id: Uuid) -> SessionResult<Vec<Session>> {
        Ok(self.sessions.list_by_project(project_id).await?)
    }

    /// Apply a status transition, enforcing the state machine. Returns
    /// whether anything changed; illegal transitions are logged and ignored
    /// so stale runtime events can't corrupt intentional state.
    async fn transition(&self, id: Uuid, to: SessionStatus) -> SessionResult<bool> {
        let Some(session) = self.sessions.get(id).await? else {
            return Ok(false);
        };
        if session.status == to {
            return Ok(false);
        }
        if !session.status.can_transition_to(to) {
            warn!(session = %id, from = %session.status, to = %to, "ignoring illegal status transition");
            return Ok(false);
        }
        self.sessions.update_status(id, to).await?;
        info!(session = %id, from = %session.status, to = %to, "session status changed");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    pub async fn create(
        &self,
        project_id: Uuid,
        request: CreateSessionRequest,
    ) -> SessionResult<Session> {
        if request.prompt.trim().is_empty() {
            return Err(SessionError::InvalidInput("prompt is required".to_string()));
        }

        let project = self
            .projects
            .project(project_id)
            .await?
            .ok_or(SessionError::ProjectNotFound(project_id))?;

        let name = self.resolve_name(&project, request.name.as_deref()).await?;
        let docker_mode = request.docker_mode.unwrap_or(project.docker_mode);
        let model = request
            .model
            .or_else(|| project.default_model.clone())
            .or_else(|| self.default_model.clone());

        let session = self.provision(&project, name, model, docker_mode).await?;

        match self.launch(&project, &session, &request.prompt).await {
            Ok(launched) => {
                if let Launched::Container(container) = launched {
                    self.sessions
                        .set_container(session.id, &container.container_id, &container.volume_name)
                        .await?;
                }
                self.transition(session.id, SessionStatus::Running).await?;
                info!(session = %session.id, name = %session.name, "session created");
                self.require(session.id).await
            }
            Err(e) => {
                self.rollback_launch(&project, &session).await;
                Err(e)
            }
        }
    }

    pub async fn create_bulk(
        &self,
        project_id: Uuid,
        request: BulkCreateRequest,
    ) -> SessionResult<BulkCreationOutcome> {
        if !(BULK_MIN..=BULK_MAX).contains(&request.count) {
            return Err(SessionError::InvalidCount {
                got: request.count,
                min: BULK_MIN,
                max: BULK_MAX,
            });
        }
        if request.name.trim().is_empty() || request.prompt.trim().is_empty() {
            return Err(SessionError::InvalidInput(
                "name and prompt are required".to_string(),
            ));
        }

        let project = self
            .projects
            .project(project_id)
            .await?
            .ok_or(SessionError::ProjectNotFound(project_id))?;

        let mut created: Vec<Session> = Vec::new();

        for index in 1..=request.count {
            let display_name = format!("{}-{}", request.name, index);
            let model = request
                .model
                .clone()
                .or_else(|| project.default_model.clone())
                .or_else(|| self.default_model.clone());

            // A provisioning failure rolls back every worktree this batch
            // created before erroring.
            let session = match self
                .provision(&project, display_name, model, project.docker_mode)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    error!(project = %project.id, index, error = %e, "bulk provisioning failed");
                    self.rollback_batch(&project, &created).await;
                    return Err(e);
                }
            };

            // A launch failure only rolls back its own item; sessions that
            // already launched are kept and returned.
            match self.launch(&project, &session, &request.prompt).await {
                Ok(launched) => {
                    if let Launched::Container(container) = launched {
                        self.sessions
                            .set_container(
                                session.id,
                                &container.container_id,
                                &container.volume_name,
                            )
                            .await?;
                    }
                    self.transition(session.id, SessionStatus::Running).await?;
                    created.push(self.require(session.id).await?);
                }
                Err(e) => {
                    error!(session = %session.id, index, error = %e, "bulk launch failed");
                    self.rollback_launch(&project, &session).await;
                    if created.is_empty() {
                        return Err(e);
                    }
                    info!(
                        project = %project.id,
                        succeeded = created.len(),
                        failed_at = index,
                        "returning partial bulk result"
                    );
                    return Ok(BulkCreationOutcome {
                        sessions: created,
                        failure: Some(BulkFailure {
                            index,
                            reason: e.to_string(),
                        }),
                    });
                }
            }
        }

        info!(project = %project.id, count = created.len(), "bulk sessions created");
        Ok(BulkCreationOutcome {
            sessions: created,
            failure: None,
        })
    }

    /// Validate a requested name or generate the next free `session-N`.
    async fn resolve_name(
        &self,
        project: &Project,
        requested: Option<&str>,
    ) -> SessionResult<String> {
        if let Some(name) = requested.map(str::trim).filter(|name| !name.is_empty()) {
            if self.sessions.name_exists(project.id, name).await? {
                return Err(SessionError::InvalidInput(format!(
                    "session name already exists: {name}"
                )));
            }
            return Ok(name.to_string());
        }

        let mut index = self.sessions.list_by_project(project.id).await?.len() + 1;
        loop {
            let candidate = format!("session-{index}");
            if !self.sessions.name_exists(project.id, &candidate).await? {
                return Ok(candidate);
            }
            index += 1;
        }
    }

    /// Create the worktree and the `initializing` record for a session.
    async fn provision(
        &self,
        project: &Project,
        name: String,
        model: Option<String>,
        docker_mode: bool,
    ) -> SessionResult<Session> {
        let id = Uuid::new_v4();
        let token = worktree_token(id);
        let branch = session_branch(&token);

        let worktree_path = self
            .worktrees
            .create(&project.path, &token, &branch, None)
            .await?;

        let now = Utc::now();
        let session = Session {
            id,
            project_id: project.id,
            name,
            status: SessionStatus::Initializing,
            model,
            worktree_path,
            branch_name: branch,
            docker_mode,
            container_id: None,
            volume_name: None,
            history_id: None,
            created_at: now,
            updated_at: now,
            last_activity_at: now,
        };
        self.sessions.insert(session.clone()).await?;
        Ok(session)
    }

    async fn launch(
        &self,
        project: &Project,
        session: &Session,
        prompt: &str,
    ) -> SessionResult<Launched> {
        if session.docker_mode {
            let containers = self.containers.as_ref().ok_or_else(|| {
                SessionError::InvalidInput("container mode is not configured".to_string())
            })?;
            let source = RepositorySource::Local {
                path: project.path.clone(),
                branch: session.branch_name.clone(),
            };
            let container = containers
                .create_session(session.id, &session.name, source)
                .await?;
            Ok(Launched::Container(container))
        } else {
            self.supervisor
                .start(StartOptions {
                    session_id: session.id,
                    worktree_path: session.worktree_path.clone(),
                    prompt: prompt.to_string(),
                    model: session.model.clone(),
                    resume_history_id: None,
                })
                .await?;
            Ok(Launched::Process)
        }
    }

    /// Roll back one session whose launch failed: drop its worktree and mark
    /// it `error`. Cleanup failures are logged but never mask the launch
    /// error itself.
    async fn rollback_launch(&self, project: &Project, session: &Session) {
        warn!(session = %session.id, "launch failed, rolling back worktree");
        self.teardown(project, session).await;
    }

    /// Remove a session's worktree and mark the record `error`, best-effort.
    async fn teardown(&self, project: &Project, session: &Session) {
        let token = worktree_token(session.id);
        if let Err(e) = self
            .worktrees
            .remove(&project.path, &token, &session.branch_name)
            .await
        {
            warn!(session = %session.id, error = %e, "worktree rollback failed");
        }
        if let Err(e) = self
            .sessions
            .update_status(session.id, SessionStatus::Error)
            .await
        {
            warn!(session = %session.id, error = %e, "failed to mark session error");
        }
    }

    /// Roll back every session created so far in a bulk batch.
    async fn rollback_batch(&self, project: &Project, created: &[Session]) {
        for session in created {
            if session.docker_mode {
                if let (Some(containers), Some(container_id)) =
                    (self.containers.as_ref(), session.container_id.as_deref())
                {
                    containers
                        .delete_session(container_id, session.volume_name.as_deref())
                        .await;
                }
            } else {
                match self.supervisor.stop(session.id).await {
                    Ok(()) | Err(ProcessError::NotFound(_)) => {}
                    Err(e) => warn!(session = %session.id, error = %e, "failed to stop batch session"),
                }
            }
            self.teardown(project, session).await;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn stop(&self, id: Uuid) -> SessionResult<Session> {
        let session = self.require(id).await?;
        match session.status {
            SessionStatus::Stopped => return Ok(session),
            status if status.is_terminal() => {
                return Err(SessionError::InvalidState {
                    id,
                    status,
                    expected: "an active session",
                });
            }
            _ => {}
        }

        self.halt(&session, PauseReason::Manual).await?;
        self.transition(id, SessionStatus::Stopped).await?;
        self.require(id).await
    }

    pub async fn resume(&self, id: Uuid) -> SessionResult<Session> {
        let session = self.require(id).await?;
        if !matches!(
            session.status,
            SessionStatus::Stopped | SessionStatus::Error
        ) {
            return Err(SessionError::InvalidState {
                id,
                status: session.status,
                expected: "a stopped session",
            });
        }

        if session.docker_mode {
            let containers = self.containers.as_ref().ok_or_else(|| {
                SessionError::InvalidInput("container mode is not configured".to_string())
            })?;
            let container_id =
                session
                    .container_id
                    .as_deref()
                    .ok_or(SessionError::InvalidState {
                        id,
                        status: session.status,
                        expected: "a session with a container",
                    })?;
            containers.start_session(container_id).await?;
        } else {
            self.supervisor
                .start(StartOptions {
                    session_id: id,
                    worktree_path: session.worktree_path.clone(),
                    prompt: String::new(),
                    model: session.model.clone(),
                    resume_history_id: session.history_id.clone(),
                })
                .await?;
        }

        self.transition(id, SessionStatus::Running).await?;
        info!(session = %id, with_history = session.history_id.is_some(), "session resumed");
        self.require(id).await
    }

    pub async fn delete(&self, id: Uuid) -> SessionResult<()> {
        let session = self.require(id).await?;

        if session.docker_mode {
            if let (Some(containers), Some(container_id)) =
                (self.containers.as_ref(), session.container_id.as_deref())
            {
                containers
                    .delete_session(container_id, session.volume_name.as_deref())
                    .await;
            }
        } else if self.supervisor.is_running(id) {
            if let Err(e) = self.supervisor.stop(id).await {
                warn!(session = %id, error = %e, "failed to stop process during delete");
            }
        }

        // Worktree cleanup is best-effort so delete always makes progress.
        match self.projects.project(session.project_id).await? {
            Some(project) => {
                let token = worktree_token(id);
                if let Err(e) = self
                    .worktrees
                    .remove(&project.path, &token, &session.branch_name)
                    .await
                {
                    warn!(session = %id, error = %e, "worktree deletion failed during session delete");
                }
            }
            None => warn!(session = %id, "project record missing, skipping worktree cleanup"),
        }

        self.sessions.remove(id).await?;
        info!(session = %id, "session deleted");
        Ok(())
    }

    /// Stop a session's process or container without changing the record.
    async fn halt(&self, session: &Session, reason: PauseReason) -> SessionResult<()> {
        if session.docker_mode {
            if let (Some(containers), Some(container_id)) =
                (self.containers.as_ref(), session.container_id.as_deref())
            {
                containers.stop_session(container_id).await?;
            }
            return Ok(());
        }

        match self.supervisor.pause(session.id, reason).await {
            Ok(Some(history)) => {
                self.sessions.set_history_id(session.id, &history).await?;
            }
            Ok(None) => {}
            Err(ProcessError::NotFound(_)) => {
                warn!(session = %session.id, "no live process to pause");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Pause every active session, e.g. on server shutdown. Worktrees and
    /// history are preserved for later resume.
    pub async fn pause_all(&self, reason: PauseReason) {
        let sessions = match self.sessions.list().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "failed to list sessions for pause");
                return;
            }
        };

        for session in sessions {
            if !session.is_active() {
                continue;
            }
            info!(session = %session.id, %reason, "pausing session");
            if let Err(e) = self.halt(&session, reason).await {
                warn!(session = %session.id, error = %e, "failed to pause session");
            }
            if let Err(e) = self.transition(session.id, SessionStatus::Stopped).await {
                warn!(session = %session.id, error = %e, "failed to mark session stopped");
            }
        }
    }

    // ------------------------------------------------------------------
    // Terminal attachment
    // ------------------------------------------------------------------

    /// Resolve where a terminal bridge should attach, failing when the
    /// session is not in a runnable state.
    pub async fn terminal_target(&self, id: Uuid) -> SessionResult<TerminalTarget> {
        let session = self.require(id).await?;

        if !matches!(
            session.status,
            SessionStatus::Running | SessionStatus::WaitingInput
        ) {
            return Err(SessionError::InvalidState {
                id,
                status: session.status,
                expected: "a running session",
            });
        }

        if session.docker_mode {
            let containers = self.containers.as_ref().ok_or_else(|| {
                SessionError::InvalidInput("container mode is not configured".to_string())
            })?;
            let container_id =
                session
                    .container_id
                    .clone()
                    .ok_or(SessionError::InvalidState {
                        id,
                        status: session.status,
                        expected: "a session with a container",
                    })?;
            if !containers.is_running(&container_id).await? {
                return Err(SessionError::InvalidState {
                    id,
                    status: session.status,
                    expected: "a running container",
                });
            }
            Ok(TerminalTarget::Container {
                program: containers.runtime_binary(),
                container_id,
            })
        } else {
            Ok(TerminalTarget::Host {
                cwd: session.worktree_path,
            })
        }
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    /// Consume process events, applying them to session records in arrival
    /// order. Per-session ordering holds because the supervisor emits each
    /// session's events from a single pump task.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::Receiver<ProcessEvent>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = this.handle_event(event).await {
                    warn!(error = %e, "failed to apply process event");
                }
            }
        })
    }

    async fn handle_event(&self, event: ProcessEvent) -> SessionResult<()> {
        let id = event.session_id;
        match event.payload {
            ProcessEventPayload::Output { .. } => {
                match self.sessions.touch_activity(id).await {
                    Err(StoreError::NotFound) => return Ok(()),
                    other => other?,
                }
                if let Some(session) = self.sessions.get(id).await? {
                    if session.status == SessionStatus::WaitingInput {
                        self.transition(id, SessionStatus::Running).await?;
                    }
                }
            }
            ProcessEventPayload::PermissionRequest {
                request_id,
                description,
            } => {
                info!(session = %id, request = %request_id, %description, "agent requested permission");
                self.transition(id, SessionStatus::WaitingInput).await?;
            }
            ProcessEventPayload::StatusChanged { status } => match status {
                ProcessStatus::Paused { reason } => {
                    info!(session = %id, %reason, "agent paused");
                    self.transition(id, SessionStatus::Stopped).await?;
                }
                ProcessStatus::Running => {
                    self.transition(id, SessionStatus::Running).await?;
                }
                ProcessStatus::WaitingInput => {
                    self.transition(id, SessionStatus::WaitingInput).await?;
                }
            },
            ProcessEventPayload::Exit { code, signal } => {
                let Some(session) = self.sessions.get(id).await? else {
                    return Ok(());
                };
                // An exit after an intentional stop carries no new state.
                if !session.status.is_active() {
                    return Ok(());
                }
                let next = if code == Some(0) {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Error
                };
                info!(session = %id, ?code, ?signal, next = %next, "agent process exited");
                self.transition(id, next).await?;
            }
        }
        Ok(())
    }

    /// Pause sessions with no activity past the configured timeout.
    pub fn spawn_idle_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let timeout = self.idle_timeout?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = this.pause_idle_sessions(timeout).await {
                    warn!(error = %e, "idle sweep failed");
                }
            }
        }))
    }

    async fn pause_idle_sessions(&self, timeout: Duration) -> SessionResult<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::minutes(30));

        for session in self.sessions.list().await? {
            let idle = matches!(
                session.status,
                SessionStatus::Running | SessionStatus::WaitingInput
            ) && !session.docker_mode
                && session.last_activity_at < cutoff;
            if !idle {
                continue;
            }

            info!(session = %session.id, "pausing idle session");
            if let Err(e) = self.halt(&session, PauseReason::IdleTimeout).await {
                warn!(session = %session.id, error = %e, "failed to pause idle session");
                continue;
            }
            self.transition(session.id, SessionStatus::Stopped).await?;
        }
        Ok(())
    }
}
