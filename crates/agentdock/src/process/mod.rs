//! Agent process supervision.
//!
//! One agent subprocess per session. The supervisor spawns the agent CLI in
//! the session worktree, feeds it the initial prompt on stdin, pumps its
//! output into [`ProcessEvent`]s, and stops it with a graceful-then-forced
//! two-phase kill. At most one live process exists per session id.

mod error;

pub use error::{ProcessError, ProcessResult};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agentdock_protocol::{PauseReason, ProcessEvent, ProcessEventPayload, ProcessStatus};

/// Options for launching an agent process.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub session_id: Uuid,
    pub worktree_path: PathBuf,
    /// Initial prompt written to stdin. Empty on resume.
    pub prompt: String,
    pub model: Option<String>,
    /// Conversation to restore with `--resume`.
    pub resume_history_id: Option<String>,
}

/// Supervision seam used by the session orchestrator.
#[async_trait]
pub trait AgentSupervisor: Send + Sync {
    /// Spawn the agent for a session. Returns the pid.
    async fn start(&self, options: StartOptions) -> ProcessResult<u32>;

    /// Two-phase stop: graceful signal, bounded wait, then force-kill.
    async fn stop(&self, session_id: Uuid) -> ProcessResult<()>;

    /// Emit a `StatusChanged(Paused)` event, stop the process, and return
    /// the captured conversation id so callers can persist it.
    async fn pause(&self, session_id: Uuid, reason: PauseReason) -> ProcessResult<Option<String>>;

    /// Pause every live process, best-effort.
    async fn pause_all(&self, reason: PauseReason);

    /// Whether a live process exists for the session.
    fn is_running(&self, session_id: Uuid) -> bool;
}

struct ProcessEntry {
    pid: u32,
    history_id: Arc<StdMutex<Option<String>>>,
    exited: watch::Receiver<bool>,
}

/// Supervisor for agent subprocesses.
#[derive(Clone)]
pub struct ProcessSupervisor {
    binary: String,
    grace: Duration,
    events: mpsc::Sender<ProcessEvent>,
    processes: Arc<DashMap<Uuid, ProcessEntry>>,
}

impl ProcessSupervisor {
    /// How long the force-kill phase waits for the process to be reaped.
    const REAP_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(binary: impl Into<String>, grace: Duration, events: mpsc::Sender<ProcessEvent>) -> Self {
        Self {
            binary: binary.into(),
            grace,
            events,
            processes: Arc::new(DashMap::new()),
        }
    }

    fn live_entry(&self, session_id: Uuid) -> Option<(u32, watch::Receiver<bool>)> {
        self.processes.get(&session_id).and_then(|entry| {
            if *entry.exited.borrow() {
                None
            } else {
                Some((entry.pid, entry.exited.clone()))
            }
        })
    }

    async fn emit(&self, session_id: Uuid, payload: ProcessEventPayload) {
        if self
            .events
            .send(ProcessEvent::new(session_id, payload))
            .await
            .is_err()
        {
            debug!(%session_id, "event channel closed, dropping process event");
        }
    }

    #[cfg(unix)]
    fn signal(pid: u32, signal: nix::sys::signal::Signal) {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
            // ESRCH just means the process beat us to exiting.
            debug!(pid, %signal, error = %e, "signal delivery failed");
        }
    }

    /// Output pump: forwards stdout/stderr lines as events, then reaps the
    /// child and emits `Exit`. Running stream-drain and exit in one task
    /// keeps per-session event order: exit can never overtake output.
    async fn pump(
        session_id: Uuid,
        mut child: tokio::process::Child,
        history_id: Arc<StdMutex<Option<String>>>,
        events: mpsc::Sender<ProcessEvent>,
        processes: Arc<DashMap<Uuid, ProcessEntry>>,
        exited: watch::Sender<bool>,
    ) {
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;

        while !(stdout_done && stderr_done) {
            let payload = tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => match line {
                    Ok(Some(line)) => Self::classify_stdout(&line, &history_id),
                    _ => {
                        stdout_done = true;
                        None
                    }
                },
                line = stderr_lines.next_line(), if !stderr_done => match line {
                    Ok(Some(line)) => Some(ProcessEventPayload::Output { content: line }),
                    _ => {
                        stderr_done = true;
                        None
                    }
                },
            };

            if let Some(payload) = payload {
                if events
                    .send(ProcessEvent::new(session_id, payload))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }

        let (code, signal) = match child.wait().await {
            Ok(status) => {
                #[cfg(unix)]
                let signal = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal()
                };
                #[cfg(not(unix))]
                let signal = None;
                (status.code(), signal)
            }
            Err(e) => {
                warn!(%session_id, error = %e, "error waiting for agent process");
                (None, None)
            }
        };

        processes.remove(&session_id);
        let _ = exited.send(true);

        info!(%session_id, ?code, ?signal, "agent process exited");
        let _ = events
            .send(ProcessEvent::new(
                session_id,
                ProcessEventPayload::Exit { code, signal },
            ))
            .await;
    }

    /// Map one stdout line to an event payload, recording conversation ids
    /// as a side effect.
    fn classify_stdout(
        line: &str,
        history_id: &Arc<StdMutex<Option<String>>>,
    ) -> Option<ProcessEventPayload> {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
            if let Some(id) = value.get("session_id").and_then(|v| v.as_str()) {
                if let Ok(mut history) = history_id.lock() {
                    *history = Some(id.to_string());
                }
            }

            if value.get("type").and_then(|v| v.as_str()) == Some("permission_request") {
                let request_id = value
                    .get("request_id")
                    .or_else(|| value.get("id"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let description = value
                    .get("description")
                    .or_else(|| value.get("action"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(line)
                    .to_string();
                return Some(ProcessEventPayload::PermissionRequest {
                    request_id,
                    description,
                });
            }
        }

        Some(ProcessEventPayload::Output {
            content: line.to_string(),
        })
    }
}

#[async_trait]
impl AgentSupervisor for ProcessSupervisor {
    async fn start(&self, options: StartOptions) -> ProcessResult<u32> {
        let StartOptions {
            session_id,
            worktree_path,
            prompt,
            model,
            resume_history_id,
        } = options;

        if self.live_entry(session_id).is_some() {
            return Err(ProcessError::AlreadyRunning(session_id));
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--print");
        if let Some(model) = &model {
            cmd.args(["--model", model]);
        }
        if let Some(history) = &resume_history_id {
            cmd.args(["--resume", history]);
        }
        cmd.current_dir(&worktree_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::AgentNotFound(self.binary.clone())
            } else {
                ProcessError::Spawn(e)
            }
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Spawn(std::io::Error::other("spawned without pid")))?;

        if let Some(mut stdin) = child.stdin.take() {
            if !prompt.is_empty() {
                stdin
                    .write_all(format!("{prompt}\n").as_bytes())
                    .await
                    .map_err(ProcessError::Spawn)?;
            }
            // Closing stdin signals end of input to the agent.
            drop(stdin);
        }

        let history_id = Arc::new(StdMutex::new(resume_history_id));
        let (exit_tx, exit_rx) = watch::channel(false);
        self.processes.insert(
            session_id,
            ProcessEntry {
                pid,
                history_id: history_id.clone(),
                exited: exit_rx,
            },
        );

        tokio::spawn(Self::pump(
            session_id,
            child,
            history_id,
            self.events.clone(),
            self.processes.clone(),
            exit_tx,
        ));

        info!(%session_id, pid, worktree = %worktree_path.display(), "agent process started");
        Ok(pid)
    }

    async fn stop(&self, session_id: Uuid) -> ProcessResult<()> {
        let (pid, mut exited) = self
            .live_entry(session_id)
            .ok_or(ProcessError::NotFound(session_id))?;

        #[cfg(unix)]
        Self::signal(pid, nix::sys::signal::Signal::SIGTERM);

        let graceful = tokio::time::timeout(self.grace, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if !graceful {
            warn!(%session_id, pid, "graceful stop timed out, force-killing");
            #[cfg(unix)]
            Self::signal(pid, nix::sys::signal::Signal::SIGKILL);

            if tokio::time::timeout(Self::REAP_TIMEOUT, exited.wait_for(|done| *done))
                .await
                .is_err()
            {
                warn!(%session_id, pid, "agent process did not exit after SIGKILL");
            }
        }

        Ok(())
    }

    async fn pause(&self, session_id: Uuid, reason: PauseReason) -> ProcessResult<Option<String>> {
        let history = {
            let entry = self
                .processes
                .get(&session_id)
                .ok_or(ProcessError::NotFound(session_id))?;
            entry
                .history_id
                .lock()
                .map(|history| history.clone())
                .unwrap_or_default()
        };

        // Observers must see the pause reason before the exit event lands.
        self.emit(
            session_id,
            ProcessEventPayload::StatusChanged {
                status: ProcessStatus::Paused { reason },
            },
        )
        .await;

        self.stop(session_id).await?;
        info!(%session_id, %reason, "agent process paused");
        Ok(history)
    }

    async fn pause_all(&self, reason: PauseReason) {
        let session_ids: Vec<Uuid> = self.processes.iter().map(|entry| *entry.key()).collect();
        for session_id in session_ids {
            match self.pause(session_id, reason).await {
                Ok(_) => {}
                Err(ProcessError::NotFound(_)) => {}
                Err(e) => warn!(%session_id, error = %e, "failed to pause agent process"),
            }
        }
    }

    fn is_running(&self, session_id: Uuid) -> bool {
        self.live_entry(session_id).is_some()
    }
}
