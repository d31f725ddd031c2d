//! Configuration resolution for dbgate.
//!
//! Resolution order (lowest to highest priority):
//! 1. Built-in defaults
//! 2. Settings file (`--config`, else the global settings file if present)
//! 3. Environment variables and CLI arguments (applied by the binary)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete dbgate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
        }
    }
}

/// How to run the engine subprocess and how long to wait on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable.
    pub program: PathBuf,
    /// Extra arguments passed to the engine.
    pub args: Vec<String>,
    /// Working directory for the engine (defaults to the daemon's cwd).
    pub working_dir: Option<PathBuf>,
    /// Inactivity window per command; reset on every output chunk.
    pub command_timeout_ms: u64,
    /// Fixed delay between an engine failure and the next start.
    pub restart_delay_ms: u64,
    /// How long to wait for the startup banner and first prompt.
    pub startup_grace_ms: u64,
    /// How long to wait for a killed engine to be reaped on shutdown.
    pub terminate_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dbms"),
            args: Vec::new(),
            working_dir: None,
            command_timeout_ms: 10_000,
            restart_delay_ms: 1_000,
            startup_grace_ms: 2_000,
            terminate_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Config for `program` with default timings.
    pub fn for_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub const fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub const fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub const fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level for dbgate's own targets (e.g. "info", "debug").
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.program.as_os_str().is_empty() {
            return Err(Error::Config("engine.program must not be empty".into()));
        }
        if self.engine.command_timeout_ms == 0 {
            return Err(Error::Config(
                "engine.command_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.log.level.trim().is_empty() {
            return Err(Error::Config("log.level must not be empty".into()));
        }
        Ok(())
    }
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the global settings file is
/// read when present and defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_config_file(path);
    }
    match global_config_path() {
        Some(global) if global.exists() => load_config_file(&global),
        _ => Ok(Config::default()),
    }
}

/// Get the global settings file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".dbgate").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/dbgate/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("dbgate").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = Config::default();
        assert_eq!(config.engine.command_timeout(), Duration::from_secs(10));
        assert_eq!(config.engine.restart_delay(), Duration::from_secs(1));
        assert_eq!(config.server.addr.port(), 3001);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"engine": {"program": "/opt/dbms/bin/dbms", "command_timeout_ms": 2500}}"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.engine.program, PathBuf::from("/opt/dbms/bin/dbms"));
        assert_eq!(config.engine.command_timeout(), Duration::from_millis(2500));
        assert_eq!(config.engine.restart_delay_ms, 1_000);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        let message = err.to_string();
        assert!(message.contains("Failed to parse"));
        assert!(message.contains("settings.json"), "{message}");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = Config::default();
        config.engine.command_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_program_is_rejected() {
        let config = Config {
            engine: EngineConfig::for_program(""),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
