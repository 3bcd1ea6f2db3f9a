//! HTTP and WebSocket surface.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod terminal;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
pub use terminal::TerminalRegistry;
