//! Inbound boundary of the core: validate, enqueue, report health.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use dbgate_core::ExecError;
use dbgate_core::prompt::CommandOutput;

use crate::engine::{CommandChannel, Supervisor};
use crate::queue::RequestQueue;

/// Liveness snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Health {
    /// A live engine instance exists.
    pub live: bool,
    /// Commands waiting behind the one in flight.
    pub queue_depth: usize,
}

/// Entry point used by transports. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    supervisor: Arc<Supervisor>,
    queue: Arc<RequestQueue>,
}

impl Gateway {
    /// Wire a queue and command channel onto `supervisor`.
    pub fn new(supervisor: Arc<Supervisor>, command_timeout: Duration) -> Self {
        let channel = Arc::new(CommandChannel::new(
            Arc::clone(&supervisor),
            command_timeout,
        ));
        Self {
            supervisor,
            queue: Arc::new(RequestQueue::new(channel)),
        }
    }

    /// Run one command line against the engine.
    pub async fn execute(&self, command: &str) -> Result<CommandOutput, ExecError> {
        validate_command(command)?;
        self.queue.enqueue(command.to_string()).await
    }

    /// Non-blocking liveness query.
    pub fn health(&self) -> Health {
        Health {
            live: self.supervisor.is_live(),
            queue_depth: self.queue.depth(),
        }
    }

    pub const fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Stop accepting commands and take the engine down.
    pub async fn shutdown(&self) {
        info!(queued = self.queue.depth(), "Closing request queue");
        self.queue.close();
        self.supervisor.shutdown().await;
    }
}

/// A command is a single non-blank line; the line terminator is added later.
pub fn validate_command(command: &str) -> Result<(), ExecError> {
    if command.trim().is_empty() {
        return Err(ExecError::InvalidInput("command is empty".to_string()));
    }
    if command.contains(['\n', '\r']) {
        return Err(ExecError::InvalidInput(
            "command must be a single line".to_string(),
        ));
    }
    Ok(())
}
