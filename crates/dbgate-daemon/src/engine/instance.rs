//! A single running engine process.
//!
//! The process's stdout is pumped into a bounded channel of raw chunks and
//! its stderr is logged line by line. A reaper task owns the `Child` and
//! publishes the exit status, so the rest of the daemon never touches the
//! process directly.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use dbgate_core::config::EngineConfig;

/// Chunks buffered between the stdout pump and the command channel.
const OUTPUT_CHANNEL_CAPACITY: usize = 64;
const READ_BUFFER_SIZE: usize = 4096;

pub(crate) type OutputRx = mpsc::Receiver<Vec<u8>>;
pub(crate) type Stdin = Box<dyn AsyncWrite + Send + Unpin>;

/// How an engine process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal (unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// Anything but a clean `exit(0)`.
    pub const fn is_unexpected(&self) -> bool {
        !matches!(self.code, Some(0))
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Handle to one engine process.
pub struct Instance {
    id: String,
    pid: Option<u32>,
    stdin: Mutex<Stdin>,
    output: Arc<Mutex<OutputRx>>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: watch::Sender<bool>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("exit", &*self.exit.borrow())
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Spawn the configured engine with all three streams piped.
    pub(crate) fn spawn(config: &EngineConfig) -> std::io::Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env_remove("NOTIFY_SOCKET")
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let id = uuid::Uuid::new_v4().to_string();
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdout"))?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(pump_stdout(id.clone(), stdout, output_tx));

        if let Some(stderr) = child.stderr.take() {
            let id_err = id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        warn!(instance_id = %id_err, "engine stderr: {}", line);
                    }
                }
                debug!(instance_id = %id_err, "stderr reader finished");
            });
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = watch::channel(false);
        tokio::spawn(reap(id.clone(), child, kill_rx, exit_tx));

        info!(
            instance_id = %id,
            pid = ?pid,
            program = %config.program.display(),
            "Spawned engine process"
        );

        Ok(Self::from_parts(id, pid, Box::new(stdin), output_rx, exit_rx, kill_tx))
    }

    pub(crate) fn from_parts(
        id: String,
        pid: Option<u32>,
        stdin: Stdin,
        output: OutputRx,
        exit: watch::Receiver<Option<ExitInfo>>,
        kill: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            pid,
            stdin: Mutex::new(stdin),
            output: Arc::new(Mutex::new(output)),
            exit,
            kill,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Not killed and not exited.
    pub fn is_live(&self) -> bool {
        !*self.kill.borrow() && self.exit.borrow().is_none()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    /// Ask the reaper to kill the process. Idempotent.
    pub fn kill(&self) {
        if !self.kill.send_replace(true) {
            debug!(instance_id = %self.id, "Kill requested");
        }
    }

    /// Resolves once the process has exited.
    pub async fn wait_exit(&self) -> Option<ExitInfo> {
        let mut exit = self.exit.clone();
        wait_exited(&mut exit).await
    }

    /// Write `line` plus a newline terminator and flush.
    pub(crate) async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// The output stream. Whoever holds the lock owns the framing.
    pub(crate) fn output(&self) -> Arc<Mutex<OutputRx>> {
        Arc::clone(&self.output)
    }

    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit.clone()
    }
}

/// Wait until `exit` carries a status. `None` if the reaper vanished first.
pub(crate) async fn wait_exited(exit: &mut watch::Receiver<Option<ExitInfo>>) -> Option<ExitInfo> {
    exit.wait_for(Option::is_some).await.ok().and_then(|info| *info)
}

async fn pump_stdout<R>(id: String, mut stdout: R, output_tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if output_tx.send(buf[..n].to_vec()).await.is_err() {
                    debug!(instance_id = %id, "output channel closed");
                    break;
                }
            }
            Err(e) => {
                warn!(instance_id = %id, error = %e, "Failed to read engine stdout");
                break;
            }
        }
    }
    debug!(instance_id = %id, "stdout reader finished");
}

async fn reap(
    id: String,
    mut child: Child,
    mut kill_rx: watch::Receiver<bool>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx.wait_for(|killed| *killed) => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                warn!(instance_id = %id, error = %e, "Failed to kill engine process");
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            warn!(instance_id = %id, error = %e, "Error waiting for engine process");
            ExitInfo {
                code: None,
                signal: None,
            }
        }
    };
    exit_tx.send_replace(Some(info));
}
