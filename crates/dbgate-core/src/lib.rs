//! `dbgate` Core Library
//!
//! Shared functionality for `dbgate` components:
//! - Prompt-based response framing for interactive engines
//! - Configuration resolution (defaults, settings file, overrides)
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod prompt;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, ExecError, Result};
pub use prompt::{CommandOutput, Extraction};
