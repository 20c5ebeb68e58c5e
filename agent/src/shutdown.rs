use crate::tunnel::TunnelProcess;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What triggered the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    TunnelExited,
    LaunchFailed,
    Exit,
}

/// Single, idempotent teardown routine shared by signal handling and the
/// normal exit path.
pub struct ShutdownCoordinator {
    done: AtomicBool,
    token: CancellationToken,
    tunnel: Mutex<Option<Arc<dyn TunnelProcess>>>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write + Send>) -> Self {
        Self {
            done: AtomicBool::new(false),
            token: CancellationToken::new(),
            tunnel: Mutex::new(None),
            out: Mutex::new(out),
        }
    }

    /// Fires once shutdown has begun
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Register the tunnel that shutdown must stop.
    ///
    /// A tunnel attached after shutdown already ran is stopped right away.
    pub fn attach(&self, tunnel: Arc<dyn TunnelProcess>) {
        let mut slot = self.tunnel.lock();
        if self.done.load(Ordering::SeqCst) {
            drop(slot);
            debug!("Tunnel attached after shutdown, stopping it now");
            terminate_tunnel(tunnel.as_ref());
            return;
        }
        *slot = Some(tunnel);
    }

    /// Stop the tunnel if it is still running and confirm the disconnect.
    ///
    /// Only the first call does anything; it returns `true`. Later calls
    /// return `false` without touching the tunnel or printing.
    pub fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed, ignoring {:?}", reason);
            return false;
        }

        if let ShutdownReason::Signal(signal) = reason {
            info!("Received {}, shutting down", signal);
            self.print("\nSignal received, disconnecting...");
        } else {
            info!("Shutting down ({:?})", reason);
        }
        self.token.cancel();

        let tunnel = self.tunnel.lock().clone();
        if let Some(tunnel) = tunnel {
            terminate_tunnel(tunnel.as_ref());
        }

        self.print("Disconnected successfully.");
        true
    }

    fn print(&self, message: &str) {
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{message}").and_then(|_| out.flush()) {
            debug!("Failed to write shutdown message: {}", e);
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn terminate_tunnel(tunnel: &dyn TunnelProcess) {
    match tunnel.try_exit() {
        Ok(Some(exit)) => {
            debug!("Tunnel process already exited with {}", exit);
            return;
        }
        Ok(None) => {}
        Err(e) => warn!("Failed to query tunnel process state, terminating anyway: {}", e),
    }
    match tunnel.terminate() {
        Ok(true) => info!("Requested tunnel process {:?} to terminate", tunnel.id()),
        Ok(false) => debug!("Tunnel process was already gone"),
        Err(e) => warn!("Failed to terminate tunnel process: {}", e),
    }
}

/// Route SIGINT (and SIGTERM/SIGHUP on unix) into the coordinator for the
/// rest of the program's life.
pub fn spawn_signal_listener(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = listen_for_signals(&coordinator).await {
            error!("Signal listener failed: {}", e);
        }
    })
}

#[cfg(unix)]
async fn listen_for_signals(coordinator: &ShutdownCoordinator) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        let name = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                "SIGINT"
            }
            _ = terminate.recv() => "SIGTERM",
            _ = hangup.recv() => "SIGHUP",
        };
        coordinator.shutdown(ShutdownReason::Signal(name));
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(coordinator: &ShutdownCoordinator) -> io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        coordinator.shutdown(ShutdownReason::Signal("Ctrl-C"));
    }
}
