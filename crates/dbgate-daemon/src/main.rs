//! dbgate daemon
//!
//! Keeps one interactive database engine running and serves it over HTTP:
//! `POST /execute` runs a command line, `GET /health` reports liveness.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use dbgate_core::config::{Config, load_config};
use dbgate_daemon::engine::Supervisor;
use dbgate_daemon::{Gateway, server};

#[derive(Parser, Debug)]
#[command(name = "dbgate-daemon")]
#[command(version, about = "dbgate daemon - HTTP gateway for an interactive database engine")]
struct Args {
    /// Settings file (JSON). Defaults to the global settings file if present.
    #[arg(long, env = "DBGATE_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(long, env = "DBGATE_ADDR")]
    addr: Option<SocketAddr>,

    /// Engine executable
    #[arg(long, env = "DBGATE_PROGRAM")]
    program: Option<PathBuf>,

    /// Argument passed to the engine (repeatable)
    #[arg(long = "arg", env = "DBGATE_ARGS", value_delimiter = ' ', allow_hyphen_values = true)]
    args: Vec<String>,

    /// Working directory for the engine
    #[arg(long, env = "DBGATE_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Per-command inactivity timeout in milliseconds
    #[arg(long, env = "DBGATE_COMMAND_TIMEOUT_MS")]
    command_timeout_ms: Option<u64>,

    /// Delay before restarting a failed engine, in milliseconds
    #[arg(long, env = "DBGATE_RESTART_DELAY_MS")]
    restart_delay_ms: Option<u64>,

    /// How long to wait for the engine's startup prompt, in milliseconds (0 disables)
    #[arg(long, env = "DBGATE_STARTUP_GRACE_MS")]
    startup_grace_ms: Option<u64>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "DBGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "DBGATE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Overlay command-line and environment settings onto `config`.
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.addr = addr;
        }
        if let Some(program) = self.program {
            config.engine.program = program;
        }
        if !self.args.is_empty() {
            config.engine.args = self.args;
        }
        if self.working_dir.is_some() {
            config.engine.working_dir = self.working_dir;
        }
        if let Some(ms) = self.command_timeout_ms {
            config.engine.command_timeout_ms = ms;
        }
        if let Some(ms) = self.restart_delay_ms {
            config.engine.restart_delay_ms = ms;
        }
        if let Some(ms) = self.startup_grace_ms {
            config.engine.startup_grace_ms = ms;
        }
        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    dbgate_core::tracing_init::init_tracing(&config.log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        program = %config.engine.program.display(),
        command_timeout_ms = config.engine.command_timeout_ms,
        "Starting dbgate-daemon"
    );

    let supervisor = Arc::new(Supervisor::new(config.engine.clone()));
    let gateway = Gateway::new(Arc::clone(&supervisor), config.engine.command_timeout());

    // A listener that cannot bind is the one fatal condition.
    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;

    // Notify systemd that the daemon is ready to serve (unix only).
    // The `true` parameter unsets $NOTIFY_SOCKET before any engine is
    // spawned, so the engine subprocess can't accidentally notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    supervisor.start();

    server::serve(listener, gateway.clone(), server::shutdown_signal()).await?;

    gateway.shutdown().await;
    info!("Daemon stopped");
    Ok(())
}
