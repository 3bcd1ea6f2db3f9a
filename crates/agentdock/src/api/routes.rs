//! API route definitions.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use super::terminal;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api = Router::new()
        // Project management
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route("/projects/{project_id}", get(handlers::get_project))
        // Session management
        .route(
            "/projects/{project_id}/sessions",
            get(handlers::list_project_sessions).post(handlers::create_session),
        )
        .route(
            "/projects/{project_id}/sessions/bulk",
            post(handlers::create_bulk_sessions),
        )
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/sessions/{session_id}/stop",
            post(handlers::stop_session),
        )
        .route(
            "/sessions/{session_id}/resume",
            post(handlers::resume_session),
        )
        // Terminal bridge
        .route(
            "/sessions/{session_id}/terminal",
            get(terminal::terminal_ws),
        );

    Router::new()
        .nest("/api", api)
        .layer(trace_layer)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
