//! Command channel to the live engine instance.
//!
//! One call to [`CommandChannel::send`] writes one command line and reads
//! output until the engine shows its prompt again. The wait is bounded by an
//! inactivity timer that restarts on every chunk, so a command that keeps
//! producing output never times out; only a stalled engine does.
//!
//! The channel does not serialize callers itself. Two concurrent sends would
//! contend for the output stream and may interleave writes; the request
//! queue guarantees there is only ever one.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use dbgate_core::ExecError;
use dbgate_core::prompt::{self, CommandOutput, Extraction};

use super::instance::{OutputRx, wait_exited};
use super::supervisor::Supervisor;

/// Writes commands to the supervised engine and frames the responses.
pub struct CommandChannel {
    supervisor: Arc<Supervisor>,
    inactivity: Duration,
}

impl CommandChannel {
    pub const fn new(supervisor: Arc<Supervisor>, inactivity: Duration) -> Self {
        Self {
            supervisor,
            inactivity,
        }
    }

    pub const fn inactivity_timeout(&self) -> Duration {
        self.inactivity
    }

    /// Send `command` and wait for the engine's response.
    pub async fn send(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let Some(instance) = self.supervisor.current().filter(|i| i.is_live()) else {
            debug!(command, "No live engine instance");
            return Err(ExecError::Unavailable);
        };

        let output = instance.output();
        let mut output = output.lock().await;
        // The lock may have been held by the startup banner reader.
        if !instance.is_live() {
            return Err(ExecError::Unavailable);
        }

        let stale = discard_unsolicited(&mut output);
        if stale > 0 {
            debug!(instance_id = %instance.id(), bytes = stale, "Discarded unsolicited engine output");
        }

        let mut exit = instance.exit_watch();
        let started = tokio::time::Instant::now();
        // An engine that stops reading stdin fills the pipe; the write is
        // bounded by the same window as the response.
        match tokio::time::timeout(self.inactivity, instance.write_line(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(instance_id = %instance.id(), error = %e, "Failed to write command to engine");
                return Err(ExecError::WriteFailed(e.to_string()));
            }
            Err(_) => {
                warn!(
                    instance_id = %instance.id(),
                    window_ms = self.inactivity.as_millis(),
                    "Engine stopped accepting input"
                );
                return Err(ExecError::TimedOut { window: self.inactivity });
            }
        }
        debug!(instance_id = %instance.id(), command, "Command dispatched");

        let mut text = Utf8Accumulator::default();
        loop {
            tokio::select! {
                biased;
                chunk = tokio::time::timeout(self.inactivity, output.recv()) => match chunk {
                    Ok(Some(bytes)) => {
                        text.push(&bytes);
                        if let Extraction::Complete(out) = prompt::try_extract(text.as_str(), command) {
                            debug!(
                                instance_id = %instance.id(),
                                bytes = text.as_str().len(),
                                elapsed_ms = started.elapsed().as_millis(),
                                is_error = out.is_error,
                                "Command completed"
                            );
                            return Ok(out);
                        }
                    }
                    Ok(None) => {
                        warn!(instance_id = %instance.id(), command, "Engine output closed mid-command");
                        return Err(ExecError::Terminated);
                    }
                    Err(_) => {
                        warn!(
                            instance_id = %instance.id(),
                            command,
                            window_ms = self.inactivity.as_millis(),
                            bytes = text.as_str().len(),
                            "Command timed out waiting for engine output"
                        );
                        return Err(ExecError::TimedOut { window: self.inactivity });
                    }
                },
                _ = wait_exited(&mut exit) => {
                    // The reaper can publish the exit before the pump has
                    // forwarded the final chunk.
                    if let Some(out) = flush_after_exit(&mut output, &mut text, command).await {
                        debug!(instance_id = %instance.id(), "Command completed as engine exited");
                        return Ok(out);
                    }
                    warn!(instance_id = %instance.id(), command, "Engine exited mid-command");
                    return Err(ExecError::Terminated);
                }
            }
        }
    }
}

/// How long output still in the pipe is awaited once the engine has exited.
const EXIT_FLUSH_GRACE: Duration = Duration::from_millis(200);

/// Read whatever the engine wrote before exiting, stopping at end of stream
/// or after [`EXIT_FLUSH_GRACE`], and frame it one last time.
async fn flush_after_exit(
    output: &mut OutputRx,
    text: &mut Utf8Accumulator,
    command: &str,
) -> Option<CommandOutput> {
    let deadline = tokio::time::Instant::now() + EXIT_FLUSH_GRACE;
    while let Ok(Some(bytes)) = tokio::time::timeout_at(deadline, output.recv()).await {
        text.push(&bytes);
        if let Extraction::Complete(out) = prompt::try_extract(text.as_str(), command) {
            return Some(out);
        }
    }
    None
}

/// Drop output that arrived while no command was outstanding, such as the
/// late tail of a command that timed out. Returns the number of bytes dropped.
fn discard_unsolicited(output: &mut OutputRx) -> usize {
    let mut dropped = 0;
    while let Ok(chunk) = output.try_recv() {
        dropped += chunk.len();
    }
    dropped
}

/// Decodes a byte stream into text incrementally.
///
/// Each chunk is decoded once. A multi-byte character split across chunks
/// is held back until its remaining bytes arrive; invalid sequences become
/// U+FFFD as with [`String::from_utf8_lossy`].
#[derive(Debug, Default)]
struct Utf8Accumulator {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    self.text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = consumed + e.valid_up_to();
                    self.text
                        .push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            self.text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + len;
                        }
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
    }

    fn as_str(&self) -> &str {
        &self.text
    }
}
