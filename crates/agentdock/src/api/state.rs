//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::session::SessionOrchestrator;
use crate::store::ProjectStore;

use super::terminal::TerminalRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionOrchestrator>,
    pub projects: Arc<dyn ProjectStore>,
    pub terminals: Arc<TerminalRegistry>,
}
