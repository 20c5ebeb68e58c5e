use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Child;
use tracing::debug;

/// How the tunnel process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelExit {
    pub code: Option<i32>,
}

impl TunnelExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for TunnelExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

impl From<std::process::ExitStatus> for TunnelExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Liveness and termination of the external tunnel process
pub trait TunnelProcess: Send + Sync {
    /// Non-blocking check, `None` while the process is still running
    fn try_exit(&self) -> io::Result<Option<TunnelExit>>;

    /// Ask the process to stop gracefully. Returns `true` only for the call
    /// that actually delivered the request.
    fn terminate(&self) -> io::Result<bool>;

    fn id(&self) -> Option<u32>;
}

/// Handle to a spawned ssh client
pub struct TunnelHandle {
    child: Mutex<Child>,
    pid: Option<u32>,
    terminated: AtomicBool,
}

impl TunnelHandle {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child: Mutex::new(child),
            pid,
            terminated: AtomicBool::new(false),
        }
    }
}

impl TunnelProcess for TunnelHandle {
    fn try_exit(&self) -> io::Result<Option<TunnelExit>> {
        Ok(self.child.lock().try_wait()?.map(TunnelExit::from))
    }

    fn terminate(&self) -> io::Result<bool> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Some(exit) = self.try_exit()? {
            debug!("Tunnel process already finished with {}", exit);
            return Ok(false);
        }
        send_terminate(&self.child, self.pid)
    }

    fn id(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(unix)]
fn send_terminate(_child: &Mutex<Child>, pid: Option<u32>) -> io::Result<bool> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return Ok(false);
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => {
            debug!("Sent SIGTERM to tunnel process {}", pid);
            Ok(true)
        }
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &Mutex<Child>, _pid: Option<u32>) -> io::Result<bool> {
    child.lock().start_kill()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_display() {
        assert_eq!(TunnelExit { code: Some(255) }.to_string(), "exit code 255");
        assert_eq!(TunnelExit { code: None }.to_string(), "terminated by signal");
        assert!(TunnelExit { code: Some(0) }.success());
        assert!(!TunnelExit { code: None }.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_running_process_once() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let handle = TunnelHandle::new(child);

        assert_eq!(handle.try_exit().unwrap(), None);
        assert!(handle.terminate().unwrap());
        assert!(!handle.terminate().unwrap());

        let mut child = handle.child.lock();
        let status = child.wait().await.unwrap();
        drop(child);
        assert!(!status.success());
        assert!(handle.try_exit().unwrap().is_some());
    }
}
