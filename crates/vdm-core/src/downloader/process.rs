//! Process-group control for tool subprocesses.
//!
//! Every tool invocation runs as the leader of its own process group so that a
//! kill reaches the post-processors (ffmpeg and friends) the tool forks.

use std::io;
use tokio::process::Command;

/// How tool processes are isolated at launch and terminated later.
pub trait ProcessControl: Send + Sync {
    /// Prepare a command before spawn (e.g. make it a process-group leader).
    fn configure(&self, cmd: &mut Command);

    /// Terminate the process `pid` together with everything it spawned.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Platform default: process groups + `SIGTERM` on Unix, tree kill on Windows.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessControl;

#[cfg(unix)]
impl ProcessControl for SystemProcessControl {
    fn configure(&self, cmd: &mut Command) {
        cmd.process_group(0);
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: plain syscalls on an integer pid; no memory is shared.
        let pgid = unsafe { libc::getpgid(pid) };
        if pgid < 0 {
            return Err(io::Error::last_os_error());
        }
        let r = unsafe { libc::killpg(pgid, libc::SIGTERM) };
        if r != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
impl ProcessControl for SystemProcessControl {
    fn configure(&self, _cmd: &mut Command) {}

    fn terminate(&self, pid: u32) -> io::Result<()> {
        // No process groups: taskkill /T walks and kills the descendant tree.
        let status = std::process::Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("taskkill exited with {}", status),
            ))
        }
    }
}

#[cfg(not(any(unix, windows)))]
impl ProcessControl for SystemProcessControl {
    fn configure(&self, _cmd: &mut Command) {}

    fn terminate(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process termination not supported on this platform",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Duration;

    #[tokio::test]
    async fn terminate_reaches_grandchildren() {
        let control = SystemProcessControl;
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & wait"])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        control.configure(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();

        control.terminate(pid).unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("group leader should exit after SIGTERM")
            .unwrap();
        assert!(!status.success());
        // The whole group is gone, so signalling it again fails.
        assert!(control.terminate(pid).is_err());
    }
}
