//! Process supervisor primitives used to start and stop model backends.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::SwapError;

/// Timeout for one `systemctl` invocation.
const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(30);

/// Starts and stops named units.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn start(&self, unit: &str) -> Result<(), SwapError>;
    async fn stop(&self, unit: &str) -> Result<(), SwapError>;
}

/// Runs `systemctl --user <action> <unit>`.
#[derive(Debug, Clone)]
pub struct SystemdSupervisor {
    timeout: Duration,
}

impl Default for SystemdSupervisor {
    fn default() -> Self {
        Self {
            timeout: SYSTEMCTL_TIMEOUT,
        }
    }
}

impl SystemdSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A supervisor when `systemctl` is on `PATH`, `None` otherwise.
    pub fn detect() -> Option<Self> {
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .any(|dir| dir.join("systemctl").is_file())
            .then(Self::new)
    }

    async fn run(&self, action: &str, unit: &str) -> Result<(), SwapError> {
        let mut command = Command::new("systemctl");
        command.args(["--user", action, unit]);
        run_with_timeout(command, self.timeout)
            .await
            .map_err(|reason| SwapError::Supervisor {
                action: action.to_string(),
                unit: unit.to_string(),
                reason,
            })?;
        tracing::debug!(action, unit, "systemctl succeeded");
        Ok(())
    }
}

/// Run `command` to completion, collecting stderr while it runs. The child
/// is killed if it outlives `timeout`.
async fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<(), String> {
    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn: {}", e))?;

    // Dropping the future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("timed out after {:?}", timeout))?
        .map_err(|e| e.to_string())?;

    if output.status.success() {
        return Ok(());
    }
    Err(format!(
        "exit code {}: {}",
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

#[async_trait]
impl Supervisor for SystemdSupervisor {
    async fn start(&self, unit: &str) -> Result<(), SwapError> {
        self.run("start", unit).await
    }

    async fn stop(&self, unit: &str) -> Result<(), SwapError> {
        self.run("stop", unit).await
    }
}
