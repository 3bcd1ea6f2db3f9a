//! Session lifecycle handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::session::{BulkCreateRequest, BulkCreationOutcome, CreateSessionRequest, Session};

use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// List all sessions.
#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list().await?))
}

/// List a project's sessions.
#[instrument(skip(state))]
pub async fn list_project_sessions(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Session>>> {
    Ok(Json(state.sessions.list_project(project_id).await?))
}

/// Get one session.
#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    Ok(Json(state.sessions.get(session_id).await?))
}

/// Create a session: worktree, record, and agent launch.
#[instrument(skip(state, request), fields(name = ?request.name))]
pub async fn create_session(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.sessions.create(project_id, request).await?;
    info!(session = %session.id, "created session");
    Ok((StatusCode::CREATED, Json(session)))
}

/// Create several sessions from one template. May return a partial list
/// when a launch fails after earlier items already started.
#[instrument(skip(state, request), fields(name = %request.name, count = request.count))]
pub async fn create_bulk_sessions(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
    Json(request): Json<BulkCreateRequest>,
) -> ApiResult<(StatusCode, Json<BulkCreationOutcome>)> {
    let outcome = state.sessions.create_bulk(project_id, request).await?;
    info!(count = outcome.sessions.len(), "created bulk sessions");
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Stop a session, keeping its worktree for later resume.
#[instrument(skip(state))]
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    let session = state.sessions.stop(session_id).await?;
    info!(session = %session_id, "stopped session");
    Ok(Json(session))
}

/// Resume a stopped session against its existing worktree.
#[instrument(skip(state))]
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    let session = state.sessions.resume(session_id).await?;
    info!(session = %session_id, "resumed session");
    Ok(Json(session))
}

/// Delete a session: process/container, worktree, and record.
#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.sessions.delete(session_id).await?;
    info!(session = %session_id, "deleted session");
    Ok(StatusCode::NO_CONTENT)
}
