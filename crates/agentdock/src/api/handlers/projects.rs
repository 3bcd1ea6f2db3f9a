//! Project registration handlers.
//!
//! Projects are thin records pointing at Git repositories on disk; sessions
//! are created against them.

use std::path::PathBuf;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::store::Project;
use crate::worktree::is_git_repository;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub docker_mode: bool,
}

/// Register a repository as a project.
#[instrument(skip(state, request), fields(name = %request.name))]
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("project name is required"));
    }
    if !request.path.is_dir() {
        return Err(ApiError::bad_request(format!(
            "path does not exist: {}",
            request.path.display()
        )));
    }
    if !is_git_repository(&request.path).await {
        return Err(ApiError::bad_request(format!(
            "not a git repository: {}",
            request.path.display()
        )));
    }

    let mut project = Project::new(request.name.trim(), request.path);
    project.default_model = request.default_model;
    project.docker_mode = request.docker_mode;

    state.projects.insert_project(project.clone()).await?;
    info!(project = %project.id, "project registered");
    Ok((StatusCode::CREATED, Json(project)))
}

/// List registered projects.
#[instrument(skip(state))]
pub async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.list_projects().await?))
}

/// Get one project.
#[instrument(skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<Project>> {
    state
        .projects
        .project(project_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("project {project_id} not found")))
}
