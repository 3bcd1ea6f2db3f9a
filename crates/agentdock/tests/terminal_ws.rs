//! End-to-end terminal bridge tests over a real WebSocket connection.
//!
//! Spins the full router on an ephemeral port and connects with a WebSocket
//! client. Tests that spawn a PTY are skipped when the environment has no
//! usable pty device or no `git` binary.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use uuid::Uuid;

use agentdock::api::{AppState, TerminalRegistry, create_router};
use agentdock::config::AppConfig;
use agentdock::process::{AgentSupervisor, ProcessError, ProcessResult, StartOptions};
use agentdock::session::{CreateSessionRequest, Session, SessionOrchestrator};
use agentdock::store::{MemoryStore, Project, ProjectStore};
use agentdock::worktree::GitWorktrees;

use agentdock_protocol::PauseReason;

/// Supervisor stub: every start succeeds, nothing is spawned.
#[derive(Default)]
struct StubSupervisor {
    running: Mutex<HashSet<Uuid>>,
}

#[async_trait]
impl AgentSupervisor for StubSupervisor {
    async fn start(&self, options: StartOptions) -> ProcessResult<u32> {
        self.running.lock().unwrap().insert(options.session_id);
        Ok(1)
    }

    async fn stop(&self, session_id: Uuid) -> ProcessResult<()> {
        self.running.lock().unwrap().remove(&session_id);
        Ok(())
    }

    async fn pause(
        &self,
        session_id: Uuid,
        _reason: PauseReason,
    ) -> ProcessResult<Option<String>> {
        if self.running.lock().unwrap().remove(&session_id) {
            Ok(None)
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

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn pty_available() -> bool {
    portable_pty_probe().is_ok()
}

fn portable_pty_probe() -> Result<(), Box<dyn std::error::Error>> {
    use portable_pty::{PtySize, native_pty_system};
    let system = native_pty_system();
    let pair = system.openpty(PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    })?;
    drop(pair);
    Ok(())
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

struct Server {
    _repo: TempDir,
    addr: SocketAddr,
    orchestrator: Arc<SessionOrchestrator>,
    project_id: Uuid,
}

impl Server {
    async fn start() -> Self {
        let repo = TempDir::new().unwrap();
        init_repo(repo.path());

        let store = Arc::new(MemoryStore::new());
        let project = Project::new("demo", repo.path());
        let project_id = project.id;
        store.insert_project(project).await.unwrap();

        let (event_tx, event_rx) = mpsc::channel(16);
        drop(event_tx);
        let orchestrator = Arc::new(SessionOrchestrator::new(
            store.clone(),
            store.clone(),
            Arc::new(GitWorktrees::new()),
            Arc::new(StubSupervisor::default()),
            None,
            None,
            None,
        ));
        orchestrator.spawn_event_loop(event_rx);

        let mut config = AppConfig::default();
        config.terminal.shell = "sh".to_string();

        let state = AppState {
            config: Arc::new(config),
            sessions: orchestrator.clone(),
            projects: store,
            terminals: Arc::new(TerminalRegistry::new()),
        };
        let app = create_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            _repo: repo,
            addr,
            orchestrator,
            project_id,
        }
    }

    async fn create_session(&self) -> Session {
        self.orchestrator
            .create(
                self.project_id,
                CreateSessionRequest {
                    name: Some("terminal-test".to_string()),
                    prompt: "hi".to_string(),
                    model: None,
                    docker_mode: None,
                },
            )
            .await
            .unwrap()
    }

    fn terminal_url(&self, session_id: &str) -> String {
        format!("ws://{}/api/sessions/{}/terminal", self.addr, session_id)
    }
}

/// Collect text frames until one matches, failing on timeout or close.
async fn expect_data_containing<S>(stream: &mut S, needle: &str)
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for terminal output");
        let msg = tokio::time::timeout(remaining, stream.next())
            .await
            .expect("timed out waiting for terminal output")
            .expect("connection closed early")
            .expect("connection errored");
        if let Message::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] == "data"
                && value["content"]
                    .as_str()
                    .is_some_and(|content| content.contains(needle))
            {
                return;
            }
            assert_ne!(
                value["type"], "error",
                "unexpected error frame: {value}"
            );
        }
    }
}

#[tokio::test]
async fn malformed_session_id_closes_with_policy_code() {
    if !git_available() {
        return;
    }
    let server = Server::start().await;

    let (mut ws, _) = connect_async(server.terminal_url("not-a-uuid"))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Policy);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_session_closes_with_policy_code() {
    if !git_available() {
        return;
    }
    let server = Server::start().await;

    let (mut ws, _) = connect_async(server.terminal_url(&Uuid::new_v4().to_string()))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert!(frame.reason.contains("not found"), "reason: {}", frame.reason);
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn stopped_session_is_rejected_before_pty_spawn() {
    if !git_available() {
        return;
    }
    let server = Server::start().await;
    let session = server.create_session().await;
    server.orchestrator.stop(session.id).await.unwrap();

    let (mut ws, _) = connect_async(server.terminal_url(&session.id.to_string()))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Policy);
            assert!(
                frame.reason.contains("not running"),
                "reason: {}",
                frame.reason
            );
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn input_round_trips_through_the_pty() {
    if !git_available() || !pty_available() {
        return;
    }
    let server = Server::start().await;
    let session = server.create_session().await;

    let (mut ws, _) = connect_async(server.terminal_url(&session.id.to_string()))
        .await
        .unwrap();

    ws.send(Message::Text(
        r#"{"type":"input","data":"echo agentdock-$((40+2))\n"}"#.into(),
    ))
    .await
    .unwrap();

    expect_data_containing(&mut ws, "agentdock-42").await;

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn invalid_resize_and_malformed_frames_are_ignored() {
    if !git_available() || !pty_available() {
        return;
    }
    let server = Server::start().await;
    let session = server.create_session().await;

    let (mut ws, _) = connect_async(server.terminal_url(&session.id.to_string()))
        .await
        .unwrap();

    // Out-of-range resizes and garbage frames must not error or close.
    ws.send(Message::Text(
        r#"{"type":"resize","data":{"cols":0,"rows":24}}"#.into(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text(
        r#"{"type":"resize","data":{"cols":80,"rows":1001}}"#.into(),
    ))
    .await
    .unwrap();
    ws.send(Message::Text("not json at all".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"detach"}"#.into()))
        .await
        .unwrap();

    // The bridge is still alive and still forwards input.
    ws.send(Message::Text(
        r#"{"type":"input","data":"echo still-$((1+1))-alive\n"}"#.into(),
    ))
    .await
    .unwrap();
    expect_data_containing(&mut ws, "still-2-alive").await;

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn shell_exit_sends_exit_frame_then_close() {
    if !git_available() || !pty_available() {
        return;
    }
    let server = Server::start().await;
    let session = server.create_session().await;

    let (mut ws, _) = connect_async(server.terminal_url(&session.id.to_string()))
        .await
        .unwrap();

    ws.send(Message::Text(r#"{"type":"input","data":"exit 3\n"}"#.into()))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let mut saw_exit = false;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .expect("timed out waiting for exit frame");
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .expect("timed out waiting for exit frame");
        match msg {
            Some(Ok(Message::Text(text))) => {
                let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                if value["type"] == "exit" {
                    assert_eq!(value["exitCode"], 3);
                    saw_exit = true;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(_)) => break,
        }
    }
    assert!(saw_exit, "no exit frame before close");
}
