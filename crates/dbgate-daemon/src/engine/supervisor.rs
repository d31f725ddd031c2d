//! Engine process supervisor.
//!
//! Keeps exactly one engine instance alive: spawns it, watches for its exit,
//! and restarts it after a fixed delay. Restart requests are coalesced so
//! that several failure observations for the same outage start one process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use dbgate_core::config::EngineConfig;
use dbgate_core::prompt::{self, Extraction};

use super::instance::{ExitInfo, Instance};

/// Lifecycle of the supervised engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started, or shut down.
    Stopped,
    /// Process spawned (or spawn pending); startup banner not yet consumed.
    Starting,
    /// Ready for commands.
    Running,
    /// Last instance died or failed to spawn; a restart is scheduled.
    Crashed,
}

/// Supervisor for the single engine process.
pub struct Supervisor {
    config: EngineConfig,
    current: watch::Sender<Option<Arc<Instance>>>,
    state: watch::Sender<SupervisorState>,
    /// Set while a restart is scheduled; suppresses duplicate scheduling.
    restart_pending: AtomicBool,
    shut_down: AtomicBool,
    instances_started: AtomicU64,
}

impl Supervisor {
    /// Create a stopped supervisor. Nothing is spawned until [`start`](Self::start).
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            current: watch::Sender::new(None),
            state: watch::Sender::new(SupervisorState::Stopped),
            restart_pending: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            instances_started: AtomicU64::new(0),
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Launch a new engine instance.
    ///
    /// A spawn failure is handled like a crash: a restart is scheduled.
    pub fn start(self: &Arc<Self>) {
        if self.is_shut_down() {
            debug!("Supervisor shut down, not starting engine");
            return;
        }
        self.state.send_replace(SupervisorState::Starting);

        let instance = match Instance::spawn(&self.config) {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                error!(
                    program = %self.config.program.display(),
                    error = %e,
                    "Failed to spawn engine process"
                );
                self.state.send_replace(SupervisorState::Crashed);
                self.schedule_restart();
                return;
            }
        };
        self.instances_started.fetch_add(1, Ordering::SeqCst);

        // Claim the output stream before the instance becomes visible, so the
        // first command cannot be framed against the startup banner.
        let banner_guard = instance.output().try_lock_owned().ok();

        if let Some(previous) = self.current.send_replace(Some(Arc::clone(&instance))) {
            if previous.is_live() {
                warn!(instance_id = %previous.id(), "Superseding live engine instance");
                previous.kill();
            }
        }

        let supervisor = Arc::clone(self);
        let banner_instance = Arc::clone(&instance);
        tokio::spawn(async move {
            if let Some(mut output) = banner_guard {
                supervisor.consume_banner(&banner_instance, &mut output).await;
            }
            supervisor.mark_running(&banner_instance);
        });

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let info = instance.wait_exit().await;
            supervisor.handle_exit(&instance, info);
        });
    }

    /// Schedule a restart after the configured delay.
    ///
    /// Returns `false` without doing anything when a restart is already
    /// pending or the supervisor has been shut down.
    pub fn schedule_restart(self: &Arc<Self>) -> bool {
        if self.is_shut_down() {
            return false;
        }
        if self.restart_pending.swap(true, Ordering::SeqCst) {
            debug!("Engine restart already scheduled");
            return false;
        }

        let delay = self.config.restart_delay();
        info!(delay_ms = delay.as_millis(), "Scheduling engine restart");
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            supervisor.restart_pending.store(false, Ordering::SeqCst);
            supervisor.start();
        });
        true
    }

    /// An instance exists and has neither exited nor been killed.
    pub fn is_live(&self) -> bool {
        self.current.borrow().as_ref().is_some_and(|i| i.is_live())
    }

    /// The current instance, live or not.
    pub fn current(&self) -> Option<Arc<Instance>> {
        self.current.borrow().clone()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_pending.load(Ordering::SeqCst)
    }

    /// Number of engine processes successfully spawned so far.
    pub fn instances_started(&self) -> u64 {
        self.instances_started.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Kill the current instance and stop restarting. Terminal.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down engine supervisor");

        if let Some(instance) = self.current() {
            instance.kill();
            let timeout = self.config.terminate_timeout();
            match tokio::time::timeout(timeout, instance.wait_exit()).await {
                Ok(info) => info!(instance_id = %instance.id(), exit = ?info, "Engine stopped"),
                Err(_) => warn!(
                    instance_id = %instance.id(),
                    timeout_ms = timeout.as_millis(),
                    "Timed out waiting for engine to exit"
                ),
            }
        }
        self.state.send_replace(SupervisorState::Stopped);
    }

    async fn consume_banner(&self, instance: &Instance, output: &mut super::instance::OutputRx) {
        let grace = self.config.startup_grace();
        if grace.is_zero() {
            return;
        }

        let mut buffer = Vec::new();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, output.recv()).await {
                Ok(Some(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    let text = String::from_utf8_lossy(&buffer);
                    if let Extraction::Complete(banner) = prompt::try_extract(&text, "") {
                        debug!(
                            instance_id = %instance.id(),
                            context = ?prompt::prompt_context(&text),
                            banner = %banner.body,
                            "Engine ready"
                        );
                        return;
                    }
                }
                Ok(None) => return,
                Err(_) => {
                    debug!(
                        instance_id = %instance.id(),
                        bytes = buffer.len(),
                        "No startup prompt within grace period"
                    );
                    return;
                }
            }
        }
    }

    fn mark_running(&self, instance: &Arc<Instance>) {
        let is_current = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, instance));
        if is_current && instance.is_live() && !self.is_shut_down() {
            self.state.send_replace(SupervisorState::Running);
        }
    }

    fn handle_exit(self: &Arc<Self>, instance: &Arc<Instance>, info: Option<ExitInfo>) {
        match info {
            Some(exit) if exit.is_unexpected() => error!(
                instance_id = %instance.id(),
                code = ?exit.code,
                signal = ?exit.signal,
                "Engine exited unexpectedly"
            ),
            _ => info!(instance_id = %instance.id(), exit = ?info, "Engine exited"),
        }

        if self.is_shut_down() {
            self.state.send_replace(SupervisorState::Stopped);
            return;
        }
        let is_current = self
            .current
            .borrow()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, instance));
        if !is_current {
            debug!(instance_id = %instance.id(), "Superseded instance exited");
            return;
        }

        // Even a clean exit leaves nothing to send commands to.
        self.state.send_replace(SupervisorState::Crashed);
        self.schedule_restart();
    }

    /// Install a ready-made instance without spawning a process.
    #[cfg(test)]
    pub(crate) fn install(&self, instance: Arc<Instance>) {
        self.current.send_replace(Some(instance));
        self.state.send_replace(SupervisorState::Running);
    }
}
