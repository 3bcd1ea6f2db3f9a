//! HTTP request handlers.

pub mod projects;
pub mod sessions;

pub use projects::{create_project, get_project, list_projects};
pub use sessions::{
    create_bulk_sessions, create_session, delete_session, get_session, list_project_sessions,
    list_sessions, resume_session, stop_session,
};
