//! WebSocket-to-PTY terminal bridge.
//!
//! One bridge per connection: the session id is resolved from the path, the
//! connection is rejected (close code 1008) unless the session's process or
//! container is runnable, then a PTY is spawned against the live target and
//! pumped in both directions until either side goes away. Connection close
//! kills the PTY; PTY exit sends one `exit` frame and closes the connection.

use std::io::{Read, Write};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use portable_pty::{CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use agentdock_protocol::{ClientFrame, ServerFrame};

use crate::session::{SessionError, TerminalTarget};

use super::state::AppState;

/// Close code for rejected connections.
const CLOSE_POLICY: u16 = 1008;
/// Close code for setup failures after acceptance.
const CLOSE_INTERNAL: u16 = 1011;
/// Normal closure after the PTY exits.
const CLOSE_NORMAL: u16 = 1000;

/// How long to wait for the exit status once the PTY stream ends.
const EXIT_WAIT: Duration = Duration::from_secs(5);

/// Registry of live terminal bridges, keyed by session id.
///
/// Bridges insert themselves on attach and remove themselves on detach;
/// closing a bridge never touches the underlying session.
#[derive(Debug, Default)]
pub struct TerminalRegistry {
    active: DashMap<Uuid, usize>,
}

impl TerminalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn attach(&self, session_id: Uuid) {
        *self.active.entry(session_id).or_insert(0) += 1;
    }

    fn detach(&self, session_id: Uuid) {
        let drained = match self.active.get_mut(&session_id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if drained {
            self.active.remove_if(&session_id, |_, count| *count == 0);
        }
    }

    /// Number of live bridges for a session.
    pub fn connection_count(&self, session_id: Uuid) -> usize {
        self.active.get(&session_id).map(|c| *c).unwrap_or(0)
    }
}

/// WebSocket upgrade handler for `GET /api/sessions/{id}/terminal`.
pub async fn terminal_ws(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| bridge(socket, state, session_id))
}

async fn bridge(mut socket: WebSocket, state: AppState, raw_session_id: String) {
    // Fail closed before any PTY exists.
    let Ok(session_id) = raw_session_id.parse::<Uuid>() else {
        warn!(raw = %raw_session_id, "terminal connection with malformed session id");
        close_with(&mut socket, CLOSE_POLICY, "Session ID required").await;
        return;
    };

    let target = match state.sessions.terminal_target(session_id).await {
        Ok(target) => target,
        Err(SessionError::NotFound(_)) => {
            warn!(%session_id, "terminal connection for unknown session");
            close_with(&mut socket, CLOSE_POLICY, "Session not found").await;
            return;
        }
        Err(SessionError::InvalidState { .. }) => {
            warn!(%session_id, "terminal connection for session that is not running");
            close_with(&mut socket, CLOSE_POLICY, "Session is not running").await;
            return;
        }
        Err(e) => {
            warn!(%session_id, error = %e, "terminal target resolution failed");
            close_with(&mut socket, CLOSE_INTERNAL, "Internal server error").await;
            return;
        }
    };

    let pty_system = native_pty_system();
    let size = PtySize {
        rows: state.config.terminal.rows,
        cols: state.config.terminal.cols,
        pixel_width: 0,
        pixel_height: 0,
    };
    let pair = match pty_system.openpty(size) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%session_id, error = %e, "failed to open pty");
            reject(&mut socket, "failed to open pty").await;
            return;
        }
    };

    let shell = state.config.terminal.shell.clone();
    let mut cmd = match &target {
        TerminalTarget::Host { cwd } => {
            let mut cmd = CommandBuilder::new(&shell);
            cmd.cwd(cwd);
            cmd
        }
        TerminalTarget::Container {
            program,
            container_id,
        } => {
            let mut cmd = CommandBuilder::new(program);
            cmd.args(["exec", "-it", container_id.as_str(), shell.as_str()]);
            cmd
        }
    };
    cmd.env("TERM", "xterm-256color");

    let mut child = match pair.slave.spawn_command(cmd) {
        Ok(child) => child,
        Err(e) => {
            warn!(%session_id, error = %e, "failed to spawn terminal process");
            reject(&mut socket, "failed to spawn terminal process").await;
            return;
        }
    };
    drop(pair.slave);

    let master = pair.master;
    let mut killer = child.clone_killer();

    let mut reader = match master.try_clone_reader() {
        Ok(reader) => reader,
        Err(e) => {
            warn!(%session_id, error = %e, "failed to clone pty reader");
            let _ = killer.kill();
            reject(&mut socket, "failed to attach pty").await;
            return;
        }
    };
    let mut writer = match master.take_writer() {
        Ok(writer) => writer,
        Err(e) => {
            warn!(%session_id, error = %e, "failed to take pty writer");
            let _ = killer.kill();
            reject(&mut socket, "failed to attach pty").await;
            return;
        }
    };

    // PTY output is read on a blocking task and handed to the async loop.
    let (output_tx, mut output_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client input is written from its own blocking task.
    let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::task::spawn_blocking(move || {
        while let Some(bytes) = input_rx.blocking_recv() {
            if writer.write_all(&bytes).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });

    let (exit_tx, mut exit_rx) = oneshot::channel::<u32>();
    tokio::task::spawn_blocking(move || {
        let code = child
            .wait()
            .map(|status| status.exit_code())
            .unwrap_or(1);
        let _ = exit_tx.send(code);
    });

    state.terminals.attach(session_id);
    info!(%session_id, "terminal attached");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut pty_open = true;

    loop {
        tokio::select! {
            chunk = output_rx.recv() => match chunk {
                Some(bytes) => {
                    let frame = ServerFrame::Data {
                        content: String::from_utf8_lossy(&bytes).into_owned(),
                    };
                    if send_frame(&mut ws_tx, &frame).await.is_err() {
                        // Output for a closed connection is dropped.
                        break;
                    }
                }
                None => {
                    let code = tokio::time::timeout(EXIT_WAIT, &mut exit_rx)
                        .await
                        .ok()
                        .and_then(Result::ok)
                        .unwrap_or(1);
                    let frame = ServerFrame::Exit {
                        exit_code: code as i32,
                        signal: None,
                    };
                    let _ = send_frame(&mut ws_tx, &frame).await;
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_NORMAL,
                            reason: "process exited".into(),
                        })))
                        .await;
                    pty_open = false;
                    break;
                }
            },
            msg = next_client_message(&mut ws_rx) => match msg {
                Some(text) => {
                    if let Some(bytes) = handle_client_frame(&text, master.as_ref(), session_id) {
                        let _ = input_tx.send(bytes).await;
                    }
                }
                None => break,
            },
        }
    }

    state.terminals.detach(session_id);
    if pty_open {
        let _ = killer.kill();
    }
    // Dropping the master closes the PTY and unblocks the pump tasks.
    drop(master);
    info!(%session_id, "terminal detached");
}

/// Read the next text payload from the client, skipping control frames.
/// Returns `None` when the connection is closed or errored.
async fn next_client_message(ws_rx: &mut SplitStream<WebSocket>) -> Option<String> {
    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "terminal connection error");
                return None;
            }
        }
    }
}

/// Handle one client frame. Resize frames are applied synchronously against
/// the PTY master; input frames return their bytes for the caller to forward
/// to the writer task.
fn handle_client_frame(
    text: &str,
    master: &(dyn MasterPty + Send),
    session_id: Uuid,
) -> Option<Vec<u8>> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        // Malformed or unrecognized frames are never fatal.
        Err(e) => {
            warn!(%session_id, error = %e, "ignoring malformed terminal frame");
            return None;
        }
    };
    match frame {
        ClientFrame::Resize { data } => {
            if !data.is_valid() {
                warn!(%session_id, cols = data.cols, rows = data.rows, "ignoring out-of-range resize");
                return None;
            }
            if let Err(e) = master.resize(PtySize {
                rows: data.rows,
                cols: data.cols,
                pixel_width: 0,
                pixel_height: 0,
            }) {
                warn!(%session_id, error = %e, "pty resize failed");
            }
            None
        }
        ClientFrame::Input { data } => Some(data.into_bytes()),
    }
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize terminal frame");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if socket.send(Message::Close(Some(frame))).await.is_err() {
        debug!("client disconnected before close frame");
    }
}

/// Report a setup failure and close.
async fn reject(socket: &mut WebSocket, message: &str) {
    let frame = ServerFrame::Error {
        message: message.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    close_with(socket, CLOSE_INTERNAL, "terminal setup failed").await;
}
