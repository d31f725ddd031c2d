//! Shared fixtures: a shell script that behaves like an interactive engine.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use dbgate_core::config::EngineConfig;
use dbgate_daemon::engine::{Supervisor, SupervisorState};

/// Prints a banner and a `<context>> ` prompt, then answers one line at a time.
const FAKE_ENGINE: &str = r#"ctx=dbms
printf 'Simple DBMS v1.0\nType HELP for commands\n%s> ' "$ctx"
while IFS= read -r line; do
  case "$line" in
    "USE DATABASE "*) ctx=${line#USE DATABASE }; printf 'Using database: %s\n' "$ctx" ;;
    "ECHO "*) printf 'value=%s\n' "${line#ECHO }" ;;
    SLEEP) sleep 2 ;;
    CRASH) printf 'going down\n'; exit 3 ;;
    QUIT) exit 0 ;;
    NOTIFY) printf 'notify=%s\n' "${NOTIFY_SOCKET:-unset}" ;;
    NOISE) printf 'diagnostic chatter\n' >&2; printf 'ok\n' ;;
    BAD*) printf 'Error: Invalid syntax\n' ;;
    *) printf '%s\nok\n' "$line" ;;
  esac
  printf '%s> ' "$ctx"
done
"#;

pub struct FakeEngineScript {
    _dir: tempfile::TempDir,
    pub config: EngineConfig,
}

impl FakeEngineScript {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-dbms.sh");
        std::fs::write(&script, FAKE_ENGINE).unwrap();

        let mut config = EngineConfig::for_program("/bin/sh");
        config.args = vec![script.to_string_lossy().into_owned()];
        config.command_timeout_ms = 3_000;
        config.restart_delay_ms = 100;
        config.startup_grace_ms = 2_000;
        config.terminate_timeout_ms = 2_000;
        Self { _dir: dir, config }
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::new(Supervisor::new(self.config.clone()))
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Wait until the supervisor reports `Running`.
pub async fn wait_running(supervisor: &Supervisor) {
    let mut state = supervisor.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == SupervisorState::Running),
    )
    .await
    .expect("engine did not become ready")
    .expect("supervisor dropped");
}
