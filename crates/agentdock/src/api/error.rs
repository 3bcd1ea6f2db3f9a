//! API error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::container::ContainerError;
use crate::process::ProcessError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::worktree::WorktreeError;

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// An error rendered as `{ "error": ... }` with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let message = err.to_string();
        match err {
            SessionError::NotFound(_) | SessionError::ProjectNotFound(_) => {
                Self::not_found(message)
            }
            SessionError::InvalidInput(_) | SessionError::InvalidCount { .. } => {
                Self::bad_request(message)
            }
            SessionError::InvalidState { .. } => Self::conflict(message),
            SessionError::Process(ProcessError::AlreadyRunning(_)) => Self::conflict(message),
            SessionError::Process(ProcessError::AgentNotFound(_)) => Self::unavailable(message),
            SessionError::Container(
                ContainerError::RuntimeUnavailable(_) | ContainerError::ImageBuild(_),
            ) => Self::unavailable(message),
            SessionError::Container(ContainerError::RepositoryNotFound(_)) => {
                Self::not_found(message)
            }
            SessionError::Worktree(
                WorktreeError::NotARepository(_)
                | WorktreeError::BranchExists(_)
                | WorktreeError::PathExists(_),
            ) => Self::bad_request(message),
            SessionError::Store(StoreError::Conflict(_)) => Self::conflict(message),
            _ => Self::internal(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::not_found("record not found"),
            StoreError::Conflict(message) => Self::conflict(message),
        }
    }
}
