//! Process-tree termination.
//!
//! Terminals spawn their command as the leader of a new process group, so
//! the whole tree (dev servers and their workers) can be signalled at once.
//! - Unix: `SIGTERM` to the group, then `SIGKILL` if it is still alive after
//!   [`KILL_GRACE`].
//! - Windows: `taskkill /T /F` on the pid tree.

use std::io;
use std::time::Duration;

/// Time a process group gets to exit after `SIGTERM`.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Terminate the process tree rooted at `pid`.
///
/// Returns once the termination request is issued. A tree that is already
/// gone is not an error.
pub fn terminate_process_tree(pid: u32) -> io::Result<()> {
    imp::terminate(pid)
}

#[cfg(unix)]
mod imp {
    use super::KILL_GRACE;
    use std::io;

    /// Send `signal` to the process group led by `pid`. `Ok(false)` if the
    /// group no longer exists.
    pub(super) fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<bool> {
        let pgid = pid as libc::pid_t;
        let result = unsafe { libc::kill(-pgid, signal) };
        if result == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(true)
    }

    pub(super) fn terminate(pid: u32) -> io::Result<()> {
        if !signal_group(pid, libc::SIGTERM)? {
            tracing::debug!("Process group {} already exited", pid);
            return Ok(());
        }
        tracing::debug!("Sent SIGTERM to process group {}", pid);

        let escalate = move || {
            // Signal 0 only checks that the group still exists.
            match signal_group(pid, 0) {
                Ok(true) => {
                    tracing::debug!("Process group {} ignored SIGTERM; sending SIGKILL", pid);
                    if let Err(e) = signal_group(pid, libc::SIGKILL) {
                        tracing::warn!("Failed to kill process group {}: {}", pid, e);
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::warn!("Failed to probe process group {}: {}", pid, e),
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    escalate();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(KILL_GRACE);
                    escalate();
                });
            }
        }
        Ok(())
    }
}

#[cfg(windows)]
mod imp {
    use std::io;
    use std::process::{Command, Stdio};

    pub(super) fn terminate(pid: u32) -> io::Result<()> {
        Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        tracing::debug!("Issued taskkill for process tree {}", pid);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    #[test]
    fn test_missing_group_is_not_an_error() {
        // Beyond the default pid_max.
        assert!(terminate_process_tree(4_000_000).is_ok());
    }

    #[tokio::test]
    async fn test_terminates_group() {
        let mut child = Command::new("sh")
            .args(["-c", "sleep 30"])
            .process_group(0)
            .spawn()
            .unwrap();

        terminate_process_tree(child.id()).unwrap();

        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }
}
