use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use agentdock::api::{AppState, TerminalRegistry, create_router};
use agentdock::config::AppConfig;
use agentdock::container::{ContainerOrchestrator, ContainerRuntime, RuntimeType};
use agentdock::process::ProcessSupervisor;
use agentdock::session::SessionOrchestrator;
use agentdock::store::MemoryStore;
use agentdock::worktree::GitWorktrees;

use agentdock_protocol::PauseReason;

/// Capacity of the process event channel.
const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "agentdock - isolated coding-agent sessions over Git worktrees.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeCommand),
    /// Create the default configuration file
    Init(InitCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Recreate configuration even if it already exists
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.common);

    let config_path = cli
        .common
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_path);

    match cli.command {
        Command::Serve(cmd) => {
            let config = AppConfig::load(Some(&config_path))?;
            serve(config, cmd)
        }
        Command::Init(cmd) => {
            if config_path.exists() && !cmd.force {
                println!("config already exists at {}", config_path.display());
                return Ok(());
            }
            AppConfig::write_default(&config_path)?;
            println!("wrote default config to {}", config_path.display());
            Ok(())
        }
        Command::Config { command } => {
            let config = AppConfig::load(Some(&config_path))?;
            match command {
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
                ConfigCommand::Path => {
                    println!("{}", config_path.display());
                }
            }
            Ok(())
        }
    }
}

fn init_logging(opts: &CommonOpts) {
    use tracing_subscriber::EnvFilter;

    let level = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("agentdock={level},tower_http={level}")));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn serve(config: AppConfig, cmd: ServeCommand) -> Result<()> {
    info!("starting agentdock server");

    let store = Arc::new(MemoryStore::new());

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let supervisor = Arc::new(ProcessSupervisor::new(
        config.agent.binary.clone(),
        config.session.stop_grace(),
        event_tx,
    ));

    let runtime = match (&config.container.runtime, &config.container.binary) {
        (Some(runtime), Some(binary)) => {
            let runtime_type: RuntimeType = runtime
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("parsing container.runtime")?;
            ContainerRuntime::with_binary(runtime_type, binary.clone())
        }
        (Some(runtime), None) => {
            let runtime_type: RuntimeType = runtime
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("parsing container.runtime")?;
            ContainerRuntime::with_type(runtime_type)
        }
        (None, _) => ContainerRuntime::new(),
    };
    info!(runtime = %runtime.runtime_type(), "container runtime selected");
    let containers = Arc::new(ContainerOrchestrator::new(
        Arc::new(runtime),
        config.container.clone(),
    ));

    let sessions = Arc::new(SessionOrchestrator::new(
        store.clone(),
        store.clone(),
        Arc::new(GitWorktrees::new()),
        supervisor,
        Some(containers),
        config.agent.default_model.clone(),
        config.session.idle_timeout(),
    ));

    sessions.spawn_event_loop(event_rx);
    if sessions.spawn_idle_monitor().is_some() {
        info!(
            minutes = config.session.idle_timeout_minutes,
            "idle monitor running"
        );
    }

    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);

    let state = AppState {
        config: Arc::new(config),
        sessions: sessions.clone(),
        projects: store,
        terminals: Arc::new(TerminalRegistry::new()),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;
    info!("listening on http://{addr}");

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    // Shutdown pauses live sessions instead of deleting them, preserving
    // worktrees and conversation history for later resume.
    let sessions_for_shutdown = sessions.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("shutdown signal received, pausing sessions...");
        sessions_for_shutdown
            .pause_all(PauseReason::ServerShutdown)
            .await;
        info!("shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}
