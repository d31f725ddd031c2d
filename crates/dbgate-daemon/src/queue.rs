//! FIFO request queue in front of the command channel.
//!
//! Concurrent callers are turned into one strictly ordered command stream.
//! Whichever caller finds the queue idle starts a drain task; the drain
//! dispatches one entry at a time and hands each result back through a
//! oneshot, so at most one command is ever in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

use dbgate_core::ExecError;
use dbgate_core::prompt::CommandOutput;

use crate::engine::CommandChannel;

pub type CommandResult = Result<CommandOutput, ExecError>;

struct Entry {
    command: String,
    reply: oneshot::Sender<CommandResult>,
    enqueued_at: Instant,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Entry>,
    draining: bool,
    closed: bool,
}

/// A queued command's pending result.
pub struct Ticket {
    rx: oneshot::Receiver<CommandResult>,
}

impl Ticket {
    fn resolved(result: CommandResult) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Wait for the command's turn and its result.
    pub async fn wait(self) -> CommandResult {
        self.rx.await.unwrap_or_else(|_| {
            Err(ExecError::Internal(
                "request dropped before completion".to_string(),
            ))
        })
    }
}

/// Serializes commands onto a single [`CommandChannel`].
pub struct RequestQueue {
    channel: Arc<CommandChannel>,
    state: Mutex<QueueState>,
}

impl RequestQueue {
    pub fn new(channel: Arc<CommandChannel>) -> Self {
        Self {
            channel,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Queue `command` and wait for its result.
    pub async fn enqueue(self: &Arc<Self>, command: String) -> CommandResult {
        self.submit(command).wait().await
    }

    /// Queue `command` without waiting. Queue order is the order of
    /// `submit` calls.
    pub fn submit(self: &Arc<Self>, command: String) -> Ticket {
        let (reply, rx) = oneshot::channel();
        let start_drain = {
            let mut state = self.lock();
            if state.closed {
                return Ticket::resolved(Err(ExecError::Unavailable));
            }
            state.pending.push_back(Entry {
                command,
                reply,
                enqueued_at: Instant::now(),
            });
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.drain().await });
        }
        Ticket { rx }
    }

    /// Entries waiting for their turn (the in-flight command is not counted).
    pub fn depth(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether a drain task is currently running.
    pub fn is_draining(&self) -> bool {
        self.lock().draining
    }

    /// Refuse new commands. Entries already queued still run.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let entry = {
                let mut state = self.lock();
                if let Some(entry) = state.pending.pop_front() {
                    entry
                } else {
                    state.draining = false;
                    return;
                }
            };

            let waited = entry.enqueued_at.elapsed();
            let result = self.dispatch(entry.command.clone()).await;
            match &result {
                Ok(out) => debug!(
                    command = %entry.command,
                    queued_ms = waited.as_millis(),
                    is_error = out.is_error,
                    "Command resolved"
                ),
                Err(e) => debug!(
                    command = %entry.command,
                    queued_ms = waited.as_millis(),
                    failure = e.kind(),
                    "Command failed"
                ),
            }
            if entry.reply.send(result).is_err() {
                debug!(command = %entry.command, "Caller stopped waiting for result");
            }
        }
    }

    /// Run one command in its own task so a panic is contained to this entry.
    async fn dispatch(&self, command: String) -> CommandResult {
        let channel = Arc::clone(&self.channel);
        match tokio::spawn(async move { channel.send(&command).await }).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Command dispatch failed unexpectedly");
                Err(ExecError::Internal(e.to_string()))
            }
        }
    }
}
