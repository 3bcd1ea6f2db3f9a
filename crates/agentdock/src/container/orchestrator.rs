//! Per-session container orchestration.
//!
//! A session container is an isolated volume plus one container running the
//! session image. The image entrypoint attaches the repository (cloning a
//! remote URL or the mounted local repository) into the volume and starts
//! the agent; the terminal bridge reaches it through `exec`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ContainerConfig;

use super::error::{ContainerError, ContainerResult};
use super::runtime::{ContainerRuntimeApi, RunConfig, validate_resource_name};

/// Where the local repository is mounted inside the container.
const REPO_MOUNT_TARGET: &str = "/repo";

/// Where the session volume is mounted inside the container.
const WORKSPACE_TARGET: &str = "/workspace";

/// The repository a container session attaches to.
#[derive(Debug, Clone)]
pub enum RepositorySource {
    /// Clone from a remote URL.
    Remote { url: String, branch: String },
    /// Attach a repository on the host filesystem.
    Local { path: PathBuf, branch: String },
}

/// Handles for one session container.
#[derive(Debug, Clone)]
pub struct ContainerSession {
    pub container_id: String,
    pub volume_name: String,
}

/// Orchestrates container-backed sessions against one runtime.
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntimeApi>,
    config: ContainerConfig,
}

impl ContainerOrchestrator {
    pub fn new(runtime: Arc<dyn ContainerRuntimeApi>, config: ContainerConfig) -> Self {
        Self { runtime, config }
    }

    /// The runtime binary, for `exec`-style attachment.
    pub fn runtime_binary(&self) -> String {
        self.runtime.binary()
    }

    fn container_name(session_id: Uuid) -> String {
        format!("agentdock-{}", session_id.simple())
    }

    fn volume_name(&self, session_name: &str) -> String {
        let sanitized: String = session_name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}{}", self.config.volume_prefix, sanitized)
    }

    /// Make sure the runtime is reachable and the session image exists,
    /// building it on demand.
    pub async fn ensure_image(&self) -> ContainerResult<()> {
        if let Err(e) = self.runtime.ping().await {
            return Err(ContainerError::RuntimeUnavailable(e.to_string()));
        }

        if self.runtime.image_exists(&self.config.image).await? {
            return Ok(());
        }

        let context = self.config.build_context.as_ref().ok_or_else(|| {
            ContainerError::ImageBuild(format!(
                "image {} is missing and no build context is configured",
                self.config.image
            ))
        })?;

        info!(image = %self.config.image, context = %context.display(), "building session image");
        self.runtime.build_image(&self.config.image, context).await
    }

    /// Create the volume and container for a session and start it.
    pub async fn create_session(
        &self,
        session_id: Uuid,
        session_name: &str,
        source: RepositorySource,
    ) -> ContainerResult<ContainerSession> {
        self.ensure_image().await?;

        let container_name = Self::container_name(session_id);
        validate_resource_name("container", &container_name)?;

        if self.runtime.state_status(&container_name).await?.is_some() {
            return Err(ContainerError::AlreadyExists(session_id.to_string()));
        }

        let volume_name = self.volume_name(session_name);

        let mut env = HashMap::new();
        let mut ro_mounts = Vec::new();
        match source {
            RepositorySource::Remote { url, branch } => {
                env.insert("REPO_URL".to_string(), url);
                env.insert("BRANCH".to_string(), branch);
            }
            RepositorySource::Local { path, branch } => {
                if !path.is_dir() {
                    return Err(ContainerError::RepositoryNotFound(
                        path.display().to_string(),
                    ));
                }
                env.insert("REPO_PATH".to_string(), REPO_MOUNT_TARGET.to_string());
                env.insert("BRANCH".to_string(), branch);
                ro_mounts.push((path, REPO_MOUNT_TARGET.to_string()));
            }
        }

        // Agent credentials and git identity ride along read-only when the
        // host has them.
        if let Some(home) = dirs::home_dir() {
            let claude_dir = home.join(".claude");
            if claude_dir.is_dir() {
                ro_mounts.push((claude_dir, "/root/.claude".to_string()));
            } else {
                warn!("agent auth directory not found, skipping mount");
            }

            let gitconfig = home.join(".gitconfig");
            if gitconfig.is_file() {
                ro_mounts.push((gitconfig, "/root/.gitconfig".to_string()));
            }
        }

        self.runtime.create_volume(&volume_name).await?;

        let run_config = RunConfig {
            name: container_name,
            image: self.config.image.clone(),
            env,
            volumes: vec![(volume_name.clone(), WORKSPACE_TARGET.to_string())],
            ro_mounts,
        };

        let container_id = match self.runtime.run(&run_config).await {
            Ok(id) => id,
            Err(e) => {
                // Don't leave an orphaned volume behind a failed start.
                if let Err(cleanup) = self.runtime.remove_volume(&volume_name).await {
                    warn!(volume = %volume_name, error = %cleanup, "failed to clean up volume");
                }
                return Err(e);
            }
        };

        info!(%session_id, container = %container_id, volume = %volume_name, "session container started");
        Ok(ContainerSession {
            container_id,
            volume_name,
        })
    }

    pub async fn stop_session(&self, container_id: &str) -> ContainerResult<()> {
        self.runtime.stop(container_id, Some(10)).await
    }

    pub async fn start_session(&self, container_id: &str) -> ContainerResult<()> {
        self.runtime.start(container_id).await
    }

    /// Remove the container and its volume. Both removals are best-effort so
    /// a half-deleted session can always be deleted again.
    pub async fn delete_session(&self, container_id: &str, volume_name: Option<&str>) {
        if let Err(e) = self.runtime.remove(container_id, true).await {
            warn!(container = %container_id, error = %e, "failed to remove container");
        }
        if let Some(volume) = volume_name {
            if let Err(e) = self.runtime.remove_volume(volume).await {
                warn!(volume = %volume, error = %e, "failed to remove volume");
            }
        }
    }

    /// Whether the session container is currently running.
    pub async fn is_running(&self, container_id: &str) -> ContainerResult<bool> {
        Ok(self
            .runtime
            .state_status(container_id)
            .await?
            .is_some_and(|status| status == "running"))
    }
}
