//! Error types for `dbgate` core library.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types.
///
/// Settings-file read and parse failures are reported as [`Error::Config`]
/// with the offending path in the message.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a command did not produce a response.
///
/// Every outcome of a queued command is a value; none of these variants
/// is fatal to the host process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// No live engine instance at dispatch time, or the queue is closed.
    #[error("Engine is unavailable")]
    Unavailable,

    /// The engine produced no output for the whole inactivity window.
    #[error("No output from engine for {}ms", window.as_millis())]
    TimedOut { window: Duration },

    /// Writing the command to the engine's stdin failed.
    #[error("Failed to write command to engine: {0}")]
    WriteFailed(String),

    /// The engine instance went away while the command was in flight.
    #[error("Engine exited while the command was running")]
    Terminated,

    /// The command was rejected before it reached the queue.
    #[error("Invalid command: {0}")]
    InvalidInput(String),

    /// Unexpected fault while draining the queue.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecError {
    /// Short stable tag, used as a structured log field.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::TimedOut { .. } => "timed_out",
            Self::WriteFailed(_) => "write_failed",
            Self::Terminated => "terminated",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_message_reports_window() {
        let err = ExecError::TimedOut {
            window: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "No output from engine for 10000ms");
        assert_eq!(err.kind(), "timed_out");
    }

    #[test]
    fn kinds_are_distinct() {
        let all = [
            ExecError::Unavailable,
            ExecError::TimedOut {
                window: Duration::ZERO,
            },
            ExecError::WriteFailed(String::new()),
            ExecError::Terminated,
            ExecError::InvalidInput(String::new()),
            ExecError::Internal(String::new()),
        ];
        let mut kinds: Vec<_> = all.iter().map(ExecError::kind).collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }
}
