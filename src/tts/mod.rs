//! TTS process controller.
//!
//! Spawns the external TTS binary with `-v <voice> <text>` and exposes its
//! PID to the TTS monitor and barge-in detector. Termination escalates
//! SIGTERM, polls for exit, then SIGKILL if the process doesn't honour the
//! first signal within one poll interval.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::VoiceError;

/// TTS process poll interval: 20 Hz.
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_millis(50);

const KILL_POLL_ATTEMPTS: u32 = 20;
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct TtsProcess {
    child: Option<Child>,
    pid: Option<u32>,
}

impl TtsProcess {
    /// Spawn `binary -v <voice> <text>`, stdout/stderr discarded.
    pub fn spawn(binary: &str, voice: &str, text: &str) -> Result<Self, VoiceError> {
        let child = Command::new(binary)
            .arg("-v")
            .arg(voice)
            .arg(text)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| VoiceError::TtsSpawnFailed(e.to_string()))?;

        let pid = child.id();
        info!(pid, voice, "TTS process spawned");

        Ok(Self {
            child: Some(child),
            pid,
        })
    }

    /// No TTS process for this turn; reports already-exited immediately.
    pub fn none() -> Self {
        Self {
            child: None,
            pid: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Block until the process exits, polling at the same cadence as the
    /// TTS monitor. A no-op for `none()`.
    pub async fn wait_until_exit(&mut self) {
        while !self.has_exited() {
            sleep(MONITOR_POLL_INTERVAL).await;
        }
    }

    /// Poll-check whether the process has exited. `None` PID (no TTS)
    /// always reports exited.
    pub fn has_exited(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        matches!(child.try_wait(), Ok(Some(_status)))
    }

    /// Forced termination: SIGTERM, poll for exit, escalate to SIGKILL if
    /// the process doesn't honour the first signal within one poll
    /// interval.
    pub async fn kill(&mut self) {
        let Some(pid) = self.pid else { return };

        if send_signal(pid, false) {
            return;
        }

        for _ in 0..KILL_POLL_ATTEMPTS {
            sleep(KILL_POLL_INTERVAL).await;
            if self.has_exited() {
                return;
            }
        }

        warn!(pid, "TTS process did not exit after SIGTERM, sending SIGKILL");
        send_signal(pid, true);

        if let Some(child) = self.child.as_mut() {
            let _ = child.wait().await;
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, force: bool) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let nix_pid = Pid::from_raw(pid as i32);
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    match signal::kill(nix_pid, signal) {
        Ok(()) => false,
        Err(nix::errno::Errno::ESRCH) => true,
        Err(e) => {
            warn!(pid, error = %e, "failed to signal TTS process");
            false
        }
    }
}

#[cfg(windows)]
fn send_signal(pid: u32, _force: bool) -> bool {
    use windows::Win32::Foundation::CloseHandle;
    use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

    unsafe {
        match OpenProcess(PROCESS_TERMINATE, false, pid) {
            Ok(handle) => {
                let _ = TerminateProcess(handle, 1);
                let _ = CloseHandle(handle);
                false
            }
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tts_process_reports_exited() {
        let mut proc = TtsProcess::none();
        assert!(proc.has_exited());
        assert_eq!(proc.pid(), None);
    }
}
