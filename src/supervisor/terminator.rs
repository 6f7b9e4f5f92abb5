//! OS-level process termination: send a graceful signal, poll briefly,
//! escalate to a forced kill if the process is still alive.

use std::time::Duration;

use tracing::{info, warn};

use super::error::SupervisorError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ProcessTerminator {
    pid: u32,
}

impl ProcessTerminator {
    pub fn new(pid: u32) -> Self {
        ProcessTerminator { pid }
    }

    /// Sends a graceful terminate signal, then polls `is_running` (a
    /// best-effort liveness probe supplied by the caller, typically the
    /// supervisor's own `try_wait`) every 100ms up to `timeout`. If still
    /// running afterward, escalates to a forced kill.
    #[cfg(target_family = "unix")]
    pub fn shutdown(&self, timeout: Duration, mut is_running: impl FnMut() -> bool) -> Result<(), SupervisorError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        info!(pid = self.pid, "sending SIGTERM");
        kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM)?;

        let deadline = std::time::Instant::now() + timeout;
        while is_running() {
            if std::time::Instant::now() >= deadline {
                warn!(pid = self.pid, "graceful shutdown timed out, sending SIGKILL");
                kill(Pid::from_raw(self.pid as i32), Signal::SIGKILL)?;
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    #[cfg(target_family = "windows")]
    pub fn shutdown(&self, _timeout: Duration, _is_running: impl FnMut() -> bool) -> Result<(), SupervisorError> {
        // A start script wraps the server process, so a plain kill would
        // leave children behind; /t kills the whole tree.
        std::process::Command::new("taskkill")
            .args(["/F", "/t", "/pid", &self.pid.to_string()])
            .status()?;
        Ok(())
    }
}
