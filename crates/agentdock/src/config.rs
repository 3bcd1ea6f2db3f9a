//! Application configuration.
//!
//! Settings are layered: defaults, then an optional TOML file, then
//! `AGENTDOCK_*` environment variables (`__` separates nesting, e.g.
//! `AGENTDOCK_SERVER__PORT=9000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "AGENTDOCK";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub container: ContainerConfig,
    pub session: SessionConfig,
    pub terminal: TerminalConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}

/// The coding-agent CLI launched for host-mode sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Binary name or path of the agent CLI.
    pub binary: String,
    /// Model passed with `--model` when a session doesn't pick one.
    pub default_model: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            default_model: None,
        }
    }
}

/// Container runtime settings for docker-mode sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Runtime to use ("docker" or "podman"). Auto-detected when unset.
    pub runtime: Option<String>,
    /// Override the runtime binary path.
    pub binary: Option<String>,
    /// Image used for session containers.
    pub image: String,
    /// Build context directory used when the image is missing.
    pub build_context: Option<PathBuf>,
    /// Prefix for per-session volume names.
    pub volume_prefix: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: None,
            binary: None,
            image: "agentdock-session:latest".to_string(),
            build_context: None,
            volume_prefix: "agentdock-".to_string(),
        }
    }
}

/// Session lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds to wait for graceful agent shutdown before force-killing.
    pub stop_grace_secs: u64,
    /// Minutes of inactivity before a session is paused. 0 disables the
    /// idle monitor; values below 5 are raised to 5.
    pub idle_timeout_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: 5,
            idle_timeout_minutes: 30,
        }
    }
}

impl SessionConfig {
    /// Minimum accepted idle timeout.
    const MIN_IDLE_TIMEOUT_MINUTES: u64 = 5;

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Effective idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(
                minutes.max(Self::MIN_IDLE_TIMEOUT_MINUTES) * 60,
            )),
        }
    }
}

/// Terminal bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Shell spawned inside the PTY.
    pub shell: String,
    /// Initial terminal width.
    pub cols: u16,
    /// Initial terminal height.
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl AppConfig {
    /// Default config file location (`~/.config/agentdock/config.toml`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentdock")
            .join("config.toml")
    }

    /// Load configuration, layering the file (when present) under
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        let config = Config::builder()
            .add_source(File::from(file.as_path()).format(FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("building configuration")?;

        config
            .try_deserialize()
            .context("deserializing configuration")
    }

    /// Write the default configuration to `path`, creating parent
    /// directories as needed.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let rendered =
            toml::to_string_pretty(&AppConfig::default()).context("rendering default config")?;
        std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
