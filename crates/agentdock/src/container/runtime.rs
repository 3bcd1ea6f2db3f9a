//! Container runtime driver.
//!
//! An async interface over the Docker or Podman CLI. The runtime is
//! auto-detected or configured explicitly; every argument is validated
//! before a command runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::error::{ContainerError, ContainerResult};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker runtime.
    #[default]
    Docker,
    /// Podman runtime.
    Podman,
}

impl RuntimeType {
    /// Default binary name for this runtime.
    pub fn default_binary(&self) -> &'static str {
        match self {
            RuntimeType::Docker => "docker",
            RuntimeType::Podman => "podman",
        }
    }

    /// Whether volume mounts need SELinux labels (`:Z`).
    pub fn needs_selinux_labels(&self) -> bool {
        matches!(self, RuntimeType::Podman)
    }
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "docker"),
            RuntimeType::Podman => write!(f, "podman"),
        }
    }
}

impl std::str::FromStr for RuntimeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(RuntimeType::Docker),
            "podman" => Ok(RuntimeType::Podman),
            _ => Err(format!("unknown container runtime: {s}")),
        }
    }
}

/// Configuration for running a session container.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Container name.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Named volume mounts (volume name -> container path).
    pub volumes: Vec<(String, String)>,
    /// Read-only bind mounts (host path -> container path).
    pub ro_mounts: Vec<(PathBuf, String)>,
}

impl RunConfig {
    /// Validate every field before the command is built.
    pub fn validate(&self) -> ContainerResult<()> {
        validate_image_name(&self.image)?;
        validate_resource_name("container", &self.name)?;
        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }
        for (volume, target) in &self.volumes {
            validate_resource_name("volume", volume)?;
            validate_container_path(target)?;
        }
        for (host, target) in &self.ro_mounts {
            validate_host_path(host)?;
            validate_container_path(target)?;
        }
        Ok(())
    }
}

/// Container runtime abstraction for testability.
#[async_trait]
pub trait ContainerRuntimeApi: Send + Sync {
    /// The binary this runtime shells out to (used for `exec` attach).
    fn binary(&self) -> String;

    /// Check the runtime daemon is reachable.
    async fn ping(&self) -> ContainerResult<()>;

    async fn image_exists(&self, image: &str) -> ContainerResult<bool>;
    async fn build_image(&self, image: &str, context: &std::path::Path) -> ContainerResult<()>;

    async fn create_volume(&self, name: &str) -> ContainerResult<()>;
    async fn remove_volume(&self, name: &str) -> ContainerResult<()>;

    /// Run a container detached; returns the container id.
    async fn run(&self, config: &RunConfig) -> ContainerResult<String>;
    async fn start(&self, container_id: &str) -> ContainerResult<()>;
    async fn stop(&self, container_id: &str, timeout_seconds: Option<u32>) -> ContainerResult<()>;
    async fn remove(&self, container_id: &str, force: bool) -> ContainerResult<()>;

    /// Container state string ("running", "exited", ...), `None` when the
    /// container does not exist.
    async fn state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>>;
}

/// CLI-backed container runtime.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    runtime_type: RuntimeType,
    binary: String,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerRuntime {
    /// Create a runtime with auto-detection: docker first, then podman.
    pub fn new() -> Self {
        if Self::is_binary_available("docker") {
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        } else if Self::is_binary_available("podman") {
            Self {
                runtime_type: RuntimeType::Podman,
                binary: "podman".to_string(),
            }
        } else {
            // Fall back to docker; operations will fail with a clear error.
            Self {
                runtime_type: RuntimeType::Docker,
                binary: "docker".to_string(),
            }
        }
    }

    pub fn with_type(runtime_type: RuntimeType) -> Self {
        Self {
            binary: runtime_type.default_binary().to_string(),
            runtime_type,
        }
    }

    pub fn with_binary(runtime_type: RuntimeType, binary: impl Into<String>) -> Self {
        Self {
            runtime_type,
            binary: binary.into(),
        }
    }

    pub fn runtime_type(&self) -> RuntimeType {
        self.runtime_type
    }

    fn is_binary_available(name: &str) -> bool {
        std::process::Command::new("which")
            .arg(name)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run_command(&self, command: &str, args: &[String]) -> ContainerResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: command.to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ContainerError::CommandFailed {
                command: command.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl ContainerRuntimeApi for ContainerRuntime {
    fn binary(&self) -> String {
        self.binary.clone()
    }

    async fn ping(&self) -> ContainerResult<()> {
        self.run_command("version", &["version".to_string()])
            .await
            .map(|_| ())
    }

    async fn image_exists(&self, image: &str) -> ContainerResult<bool> {
        validate_image_name(image)?;

        let output = Command::new(&self.binary)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "image inspect".to_string(),
                message: e.to_string(),
            })?;

        Ok(output.status.success())
    }

    async fn build_image(&self, image: &str, context: &std::path::Path) -> ContainerResult<()> {
        validate_image_name(image)?;

        let args = vec![
            "build".to_string(),
            "-t".to_string(),
            image.to_string(),
            context.to_string_lossy().to_string(),
        ];
        self.run_command("build", &args)
            .await
            .map(|_| ())
            .map_err(|e| ContainerError::ImageBuild(e.to_string()))
    }

    async fn create_volume(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name("volume", name)?;
        self.run_command(
            "volume create",
            &["volume".to_string(), "create".to_string(), name.to_string()],
        )
        .await
        .map(|_| ())
    }

    async fn remove_volume(&self, name: &str) -> ContainerResult<()> {
        validate_resource_name("volume", name)?;
        self.run_command(
            "volume rm",
            &["volume".to_string(), "rm".to_string(), name.to_string()],
        )
        .await
        .map(|_| ())
    }

    async fn run(&self, config: &RunConfig) -> ContainerResult<String> {
        config.validate()?;

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "-it".to_string(),
            "--name".to_string(),
            config.name.clone(),
        ];

        for (volume, target) in &config.volumes {
            args.push("-v".to_string());
            if self.runtime_type.needs_selinux_labels() {
                args.push(format!("{volume}:{target}:Z"));
            } else {
                args.push(format!("{volume}:{target}"));
            }
        }

        for (host, target) in &config.ro_mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}:ro", host.display(), target));
        }

        for (key, value) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        args.push(config.image.clone());

        let stdout = self.run_command("run", &args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start(&self, container_id: &str) -> ContainerResult<()> {
        validate_resource_name("container", container_id)?;
        self.run_command(
            "start",
            &["start".to_string(), container_id.to_string()],
        )
        .await
        .map(|_| ())
    }

    async fn stop(&self, container_id: &str, timeout_seconds: Option<u32>) -> ContainerResult<()> {
        validate_resource_name("container", container_id)?;

        let mut args = vec!["stop".to_string()];
        if let Some(timeout) = timeout_seconds {
            args.push("-t".to_string());
            args.push(timeout.to_string());
        }
        args.push(container_id.to_string());

        self.run_command("stop", &args).await.map(|_| ())
    }

    async fn remove(&self, container_id: &str, force: bool) -> ContainerResult<()> {
        validate_resource_name("container", container_id)?;

        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(container_id.to_string());

        self.run_command("rm", &args).await.map(|_| ())
    }

    async fn state_status(&self, id_or_name: &str) -> ContainerResult<Option<String>> {
        validate_resource_name("container", id_or_name)?;

        let output = Command::new(&self.binary)
            .args(["inspect", "--format", "{{.State.Status}}", id_or_name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::CommandFailed {
                command: "inspect".to_string(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            // Not found is not an error; callers treat it as missing.
            return Ok(None);
        }

        let status = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_matches('"')
            .to_string();
        if status.is_empty() {
            return Ok(None);
        }

        Ok(Some(status))
    }
}

// ============================================================================
// Input validation
// ============================================================================

/// Validate a Docker/OCI image name.
///
/// Image names follow `[registry/][namespace/]name[:tag][@digest]`.
pub fn validate_image_name(image: &str) -> ContainerResult<()> {
    if image.is_empty() {
        return Err(ContainerError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(ContainerError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid = |c: char| {
        c.is_ascii_alphanumeric()
            || c == '.'
            || c == '-'
            || c == '_'
            || c == '/'
            || c == ':'
            || c == '@'
    };
    if !image.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "image name '{image}' contains invalid characters"
        )));
    }

    if image.contains("..") {
        return Err(ContainerError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate a container or volume name (alphanumeric with `-`, `_`, `.`,
/// starting alphanumeric or underscore).
pub fn validate_resource_name(kind: &str, name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::InvalidInput(format!(
            "{kind} name cannot be empty"
        )));
    }

    if name.len() > 128 {
        return Err(ContainerError::InvalidInput(format!(
            "{kind} name exceeds maximum length of 128 characters"
        )));
    }

    let first = name.chars().next().unwrap_or('-');
    if !first.is_ascii_alphanumeric() && first != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "{kind} name must start with an alphanumeric character or underscore"
        )));
    }

    let valid = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.';
    if !name.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "{kind} name '{name}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate an environment variable key (POSIX conventions).
fn validate_env_var_key(key: &str) -> ContainerResult<()> {
    if key.is_empty() {
        return Err(ContainerError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let first = key.chars().next().unwrap_or('0');
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{key}' must start with a letter or underscore"
        )));
    }

    let valid = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !key.chars().all(valid) {
        return Err(ContainerError::InvalidInput(format!(
            "environment variable key '{key}' contains invalid characters"
        )));
    }

    Ok(())
}

/// Validate a host-side mount path.
fn validate_host_path(path: &std::path::Path) -> ContainerResult<()> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(ContainerError::InvalidInput(
            "host mount path cannot be empty".to_string(),
        ));
    }
    if raw.contains('\0') || raw.contains(':') {
        return Err(ContainerError::InvalidInput(format!(
            "host mount path '{raw}' contains invalid characters"
        )));
    }
    Ok(())
}

/// Validate a container-internal path (absolute, no NUL).
fn validate_container_path(path: &str) -> ContainerResult<()> {
    if !path.starts_with('/') {
        return Err(ContainerError::InvalidInput(
            "container path must be absolute".to_string(),
        ));
    }
    if path.contains('\0') || path.contains(':') {
        return Err(ContainerError::InvalidInput(format!(
            "container path '{path}' contains invalid characters"
        )));
    }
    Ok(())
}
