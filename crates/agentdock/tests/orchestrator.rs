//! Orchestrator lifecycle tests against a real Git repository.
//!
//! The worktree side runs real `git` (skipped when the binary is missing);
//! the agent side uses a scripted supervisor so launch failures can be
//! injected per item.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use agentdock::process::{AgentSupervisor, ProcessError, ProcessResult, StartOptions};
use agentdock::session::{
    BulkCreateRequest, CreateSessionRequest, SessionError, SessionOrchestrator, SessionStatus,
};
use agentdock::store::{MemoryStore, Project, ProjectStore, SessionStore};
use agentdock::worktree::{GitWorktrees, WorktreeError, WorktreeOps, WorktreeResult};

use agentdock_protocol::{PauseReason, ProcessEvent, ProcessEventPayload};

// ----------------------------------------------------------------------
// Test doubles
// ----------------------------------------------------------------------

/// Supervisor that records starts and can fail on the nth one.
#[derive(Default)]
struct ScriptedSupervisor {
    fail_on_start: Option<usize>,
    starts: AtomicUsize,
    running: Mutex<HashSet<Uuid>>,
}

impl ScriptedSupervisor {
    fn new() -> Self {
        Self::default()
    }

    fn failing_on(n: usize) -> Self {
        Self {
            fail_on_start: Some(n),
            ..Self::default()
        }
    }

    fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentSupervisor for ScriptedSupervisor {
    async fn start(&self, options: StartOptions) -> ProcessResult<u32> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_start == Some(attempt) {
            return Err(ProcessError::AgentNotFound("scripted failure".to_string()));
        }
        self.running.lock().unwrap().insert(options.session_id);
        Ok(4242)
    }

    async fn stop(&self, session_id: Uuid) -> ProcessResult<()> {
        if self.running.lock().unwrap().remove(&session_id) {
            Ok(())
        } else {
            Err(ProcessError::NotFound(session_id))
        }
    }

    async fn pause(
        &self,
        session_id: Uuid,
        _reason: PauseReason,
    ) -> ProcessResult<Option<String>> {
        if self.running.lock().unwrap().remove(&session_id) {
            Ok(Some("conv-test".to_string()))
        } else {
            Err(ProcessError::NotFound(session_id))
        }
    }

    async fn pause_all(&self, _reason: PauseReason) {
        self.running.lock().unwrap().clear();
    }

    fn is_running(&self, session_id: Uuid) -> bool {
        self.running.lock().unwrap().contains(&session_id)
    }
}

/// Worktree ops that delegate to real git but fail on the nth create.
struct FlakyWorktrees {
    inner: GitWorktrees,
    fail_on_create: usize,
    creates: AtomicUsize,
}

impl FlakyWorktrees {
    fn failing_on(n: usize) -> Self {
        Self {
            inner: GitWorktrees::new(),
            fail_on_create: n,
            creates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl WorktreeOps for FlakyWorktrees {
    async fn create(
        &self,
        repo: &Path,
        token: &str,
        branch: &str,
        parent: Option<&str>,
    ) -> WorktreeResult<PathBuf> {
        let attempt = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on_create {
            return Err(WorktreeError::GitCommand {
                command: "worktree add".to_string(),
                message: "injected failure".to_string(),
            });
        }
        self.inner.create(repo, token, branch, parent).await
    }

    async fn remove(&self, repo: &Path, token: &str, branch: &str) -> WorktreeResult<()> {
        self.inner.remove(repo, token, branch).await
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("running git");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "dev@example.com"]);
    git(dir, &["config", "user.name", "dev"]);
    std::fs::write(dir.join("README.md"), "# demo\n").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "init"]);
}

struct Harness {
    _repo: TempDir,
    repo_path: PathBuf,
    store: Arc<MemoryStore>,
    supervisor: Arc<ScriptedSupervisor>,
    orchestrator: Arc<SessionOrchestrator>,
    project_id: Uuid,
}

impl Harness {
    async fn new(
        worktrees: Arc<dyn WorktreeOps>,
        supervisor: Arc<ScriptedSupervisor>,
    ) -> Self {
        let repo = TempDir::new().unwrap();
        init_repo(repo.path());

        let store = Arc::new(MemoryStore::new());
        let project = Project::new("demo-project", repo.path());
        let project_id = project.id;
        store.insert_project(project).await.unwrap();

        let orchestrator = Arc::new(SessionOrchestrator::new(
            store.clone(),
            store.clone(),
            worktrees,
            supervisor.clone(),
            None,
            None,
            None,
        ));

        Self {
            repo_path: repo.path().to_path_buf(),
            _repo: repo,
            store,
            supervisor,
            orchestrator,
            project_id,
        }
    }

    async fn default() -> Self {
        Self::new(
            Arc::new(GitWorktrees::new()),
            Arc::new(ScriptedSupervisor::new()),
        )
        .await
    }

    /// Session worktree directories currently on disk.
    fn worktrees_on_disk(&self) -> Vec<String> {
        let dir = self.repo_path.join(".worktrees");
        if !dir.exists() {
            return Vec::new();
        }
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn request(name: &str) -> CreateSessionRequest {
        CreateSessionRequest {
            name: Some(name.to_string()),
            prompt: "hi".to_string(),
            model: None,
            docker_mode: None,
        }
    }
}

async fn wait_for_status(store: &MemoryStore, id: Uuid, expected: SessionStatus) {
    for _ in 0..100 {
        if let Some(session) = SessionStore::get(store, id).await.unwrap() {
            if session.status == expected {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {id} never reached {expected}");
}

// ----------------------------------------------------------------------
// Single-session lifecycle
// ----------------------------------------------------------------------

#[tokio::test]
async fn create_provisions_worktree_and_runs() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.name, "demo");
    assert!(session.worktree_path.exists());
    assert!(session.branch_name.starts_with("session/session-"));
    assert!(harness.supervisor.is_running(session.id));
    assert_eq!(harness.worktrees_on_disk().len(), 1);
}

#[tokio::test]
async fn duplicate_session_name_is_rejected() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();
    let err = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
}

#[tokio::test]
async fn unknown_project_is_rejected_before_any_side_effect() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let err = harness
        .orchestrator
        .create(Uuid::new_v4(), Harness::request("demo"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::ProjectNotFound(_)));
    assert!(harness.worktrees_on_disk().is_empty());
}

#[tokio::test]
async fn empty_prompt_is_rejected() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let err = harness
        .orchestrator
        .create(
            harness.project_id,
            CreateSessionRequest {
                name: Some("demo".to_string()),
                prompt: "  ".to_string(),
                model: None,
                docker_mode: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidInput(_)));
    assert!(harness.worktrees_on_disk().is_empty());
}

#[tokio::test]
async fn launch_failure_rolls_back_worktree() {
    if !git_available() {
        return;
    }
    let harness = Harness::new(
        Arc::new(GitWorktrees::new()),
        Arc::new(ScriptedSupervisor::failing_on(1)),
    )
    .await;

    let err = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Process(ProcessError::AgentNotFound(_))
    ));

    // The worktree is rolled back; the record remains for inspection.
    assert!(harness.worktrees_on_disk().is_empty());
    let sessions = harness.orchestrator.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Error);
}

#[tokio::test]
async fn stop_then_resume_keeps_worktree_and_branch() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();

    let stopped = harness.orchestrator.stop(session.id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Stopped);
    assert!(!harness.supervisor.is_running(session.id));
    // The conversation id captured on pause is persisted for resume.
    assert_eq!(stopped.history_id.as_deref(), Some("conv-test"));

    let resumed = harness.orchestrator.resume(session.id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::Running);
    assert_eq!(resumed.worktree_path, session.worktree_path);
    assert_eq!(resumed.branch_name, session.branch_name);
    assert!(session.worktree_path.exists());
}

#[tokio::test]
async fn resume_requires_a_stopped_session() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();
    let err = harness.orchestrator.resume(session.id).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
}

#[tokio::test]
async fn delete_removes_worktree_and_record() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();
    let path = session.worktree_path.clone();

    harness.orchestrator.delete(session.id).await.unwrap();
    assert!(!path.exists());
    assert!(!harness.supervisor.is_running(session.id));
    assert!(matches!(
        harness.orchestrator.get(session.id).await,
        Err(SessionError::NotFound(_))
    ));

    // Deleting twice reports NotFound without further side effects.
    assert!(matches!(
        harness.orchestrator.delete(session.id).await,
        Err(SessionError::NotFound(_))
    ));
}

// ----------------------------------------------------------------------
// Bulk creation
// ----------------------------------------------------------------------

#[tokio::test]
async fn bulk_count_bounds_are_enforced() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    for count in [0, 1, 11] {
        let err = harness
            .orchestrator
            .create_bulk(
                harness.project_id,
                BulkCreateRequest {
                    name: "batch".to_string(),
                    prompt: "hi".to_string(),
                    count,
                    model: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCount { .. }));
    }
    assert!(harness.worktrees_on_disk().is_empty());
    assert_eq!(harness.supervisor.start_count(), 0);
}

#[tokio::test]
async fn bulk_creates_sessions_in_request_order() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let outcome = harness
        .orchestrator
        .create_bulk(
            harness.project_id,
            BulkCreateRequest {
                name: "batch".to_string(),
                prompt: "hi".to_string(),
                count: 3,
                model: None,
            },
        )
        .await
        .unwrap();
    assert!(outcome.failure.is_none());

    let sessions = outcome.sessions;
    let names: Vec<&str> = sessions.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["batch-1", "batch-2", "batch-3"]);
    assert!(sessions.iter().all(|s| s.status == SessionStatus::Running));
    assert_eq!(harness.worktrees_on_disk().len(), 3);

    // Every session's worktree and branch derive from its own token.
    let branches: HashSet<&str> = sessions.iter().map(|s| s.branch_name.as_str()).collect();
    assert_eq!(branches.len(), 3);
}

#[tokio::test]
async fn bulk_worktree_failure_rolls_back_batch() {
    if !git_available() {
        return;
    }
    let harness = Harness::new(
        Arc::new(FlakyWorktrees::failing_on(2)),
        Arc::new(ScriptedSupervisor::new()),
    )
    .await;

    let err = harness
        .orchestrator
        .create_bulk(
            harness.project_id,
            BulkCreateRequest {
                name: "batch".to_string(),
                prompt: "hi".to_string(),
                count: 3,
                model: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Worktree(_)));

    // Item 1's worktree is rolled back with the batch; nothing remains.
    assert!(harness.worktrees_on_disk().is_empty());

    // The rolled-back session is marked error and its process stopped.
    let sessions = harness.orchestrator.list().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Error);
    assert!(!harness.supervisor.is_running(sessions[0].id));
}

#[tokio::test]
async fn bulk_launch_failure_returns_partial_success() {
    if !git_available() {
        return;
    }
    let harness = Harness::new(
        Arc::new(GitWorktrees::new()),
        Arc::new(ScriptedSupervisor::failing_on(2)),
    )
    .await;

    let outcome = harness
        .orchestrator
        .create_bulk(
            harness.project_id,
            BulkCreateRequest {
                name: "batch".to_string(),
                prompt: "hi".to_string(),
                count: 3,
                model: None,
            },
        )
        .await
        .unwrap();

    // Items before the failure are kept and returned; the failing item's
    // worktree is rolled back and creation stops there.
    let sessions = &outcome.sessions;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].name, "batch-1");
    assert_eq!(sessions[0].status, SessionStatus::Running);
    assert_eq!(outcome.failure.as_ref().map(|f| f.index), Some(2));
    assert_eq!(harness.worktrees_on_disk().len(), 1);

    let all = harness.orchestrator.list().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(
        all.iter()
            .any(|s| s.name == "batch-2" && s.status == SessionStatus::Error)
    );
}

#[tokio::test]
async fn bulk_launch_failure_on_first_item_errors() {
    if !git_available() {
        return;
    }
    let harness = Harness::new(
        Arc::new(GitWorktrees::new()),
        Arc::new(ScriptedSupervisor::failing_on(1)),
    )
    .await;

    let err = harness
        .orchestrator
        .create_bulk(
            harness.project_id,
            BulkCreateRequest {
                name: "batch".to_string(),
                prompt: "hi".to_string(),
                count: 2,
                model: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Process(_)));
    assert!(harness.worktrees_on_disk().is_empty());
}

// ----------------------------------------------------------------------
// Runtime events
// ----------------------------------------------------------------------

#[tokio::test]
async fn events_drive_the_state_machine() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;
    let (event_tx, event_rx) = mpsc::channel(16);
    harness.orchestrator.spawn_event_loop(event_rx);

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();

    // Permission request parks the session on waiting_input.
    event_tx
        .send(ProcessEvent::new(
            session.id,
            ProcessEventPayload::PermissionRequest {
                request_id: "req-1".to_string(),
                description: "write file".to_string(),
            },
        ))
        .await
        .unwrap();
    wait_for_status(&harness.store, session.id, SessionStatus::WaitingInput).await;

    // Fresh output moves it back to running.
    event_tx
        .send(ProcessEvent::new(
            session.id,
            ProcessEventPayload::Output {
                content: "continuing".to_string(),
            },
        ))
        .await
        .unwrap();
    wait_for_status(&harness.store, session.id, SessionStatus::Running).await;

    // Clean exit completes the session.
    event_tx
        .send(ProcessEvent::new(
            session.id,
            ProcessEventPayload::Exit {
                code: Some(0),
                signal: None,
            },
        ))
        .await
        .unwrap();
    wait_for_status(&harness.store, session.id, SessionStatus::Completed).await;
}

#[tokio::test]
async fn crash_exit_marks_session_error() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;
    let (event_tx, event_rx) = mpsc::channel(16);
    harness.orchestrator.spawn_event_loop(event_rx);

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();

    event_tx
        .send(ProcessEvent::new(
            session.id,
            ProcessEventPayload::Exit {
                code: Some(1),
                signal: None,
            },
        ))
        .await
        .unwrap();
    wait_for_status(&harness.store, session.id, SessionStatus::Error).await;

    // The worktree survives a crash for inspection.
    assert!(session.worktree_path.exists());
}

#[tokio::test]
async fn exit_after_intentional_stop_is_ignored() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;
    let (event_tx, event_rx) = mpsc::channel(16);
    harness.orchestrator.spawn_event_loop(event_rx);

    let session = harness
        .orchestrator
        .create(harness.project_id, Harness::request("demo"))
        .await
        .unwrap();
    harness.orchestrator.stop(session.id).await.unwrap();

    // The exit event from the killed process arrives after the stop.
    event_tx
        .send(ProcessEvent::new(
            session.id,
            ProcessEventPayload::Exit {
                code: None,
                signal: Some(15),
            },
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let current = harness.orchestrator.get(session.id).await.unwrap();
    assert_eq!(current.status, SessionStatus::Stopped);
}

#[tokio::test]
async fn pause_all_parks_active_sessions() {
    if !git_available() {
        return;
    }
    let harness = Harness::default().await;

    let a = harness
        .orchestrator
        .create(harness.project_id, Harness::request("one"))
        .await
        .unwrap();
    let b = harness
        .orchestrator
        .create(harness.project_id, Harness::request("two"))
        .await
        .unwrap();

    harness
        .orchestrator
        .pause_all(PauseReason::ServerShutdown)
        .await;

    for id in [a.id, b.id] {
        let session = harness.orchestrator.get(id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Stopped);
        assert!(session.worktree_path.exists());
    }
}
