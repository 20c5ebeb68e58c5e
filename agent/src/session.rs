use crate::error::{AgentError, Result};
use crate::launcher::{Readiness, TunnelLauncher};
use crate::monitor::{SessionEnd, ThroughputMonitor};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::tunnel::TunnelProcess;
use common::CounterSource;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One tunnel's life: spawn, readiness, monitoring and teardown
pub struct Session<'a, O> {
    launcher: &'a TunnelLauncher,
    coordinator: &'a ShutdownCoordinator,
    console: O,
}

impl<'a, O: Write> Session<'a, O> {
    pub fn new(launcher: &'a TunnelLauncher, coordinator: &'a ShutdownCoordinator, console: O) -> Self {
        Self {
            launcher,
            coordinator,
            console,
        }
    }

    /// Start the tunnel with `spawn`, wait for its SOCKS endpoint, then monitor
    /// it until it exits or shutdown begins.
    ///
    /// A failed launch runs the shutdown routine before the error is returned,
    /// which also stops a client that never became ready.
    pub async fn run<S, C, W>(&mut self, spawn: S, monitor: &mut ThroughputMonitor<C, W>) -> Result<()>
    where
        S: FnOnce() -> Result<Arc<dyn TunnelProcess>>,
        C: CounterSource,
        W: Write,
    {
        if self.coordinator.is_shut_down() {
            debug!("Shutdown already requested, not launching");
            return Ok(());
        }
        let shutdown = self.coordinator.token();

        let tunnel = match spawn() {
            Ok(tunnel) => tunnel,
            Err(e) => return Err(self.launch_failed(e)),
        };
        self.coordinator.attach(tunnel.clone());

        let readiness = self.launcher.wait_ready(tunnel.as_ref(), &shutdown).await;
        match readiness {
            Ok(Readiness::Ready) => {}
            Ok(Readiness::Cancelled) => return Ok(()),
            Err(e) => return Err(self.launch_failed(e)),
        }
        let connected = format!("Connected to {}", self.launcher.server());
        self.say(&connected);

        let report = monitor.run(tunnel.as_ref(), &shutdown).await;
        match &report.end {
            SessionEnd::TunnelExited(exit) if exit.success() => info!("Tunnel closed by the ssh client"),
            SessionEnd::TunnelExited(exit) => warn!("Tunnel process ended with {}", exit),
            SessionEnd::TunnelLost(e) => warn!("Lost track of the tunnel process: {}", e),
            SessionEnd::Cancelled => return Ok(()),
        }
        if report.skipped_samples > 0 {
            warn!(
                "{} of {} samples could not be read",
                report.skipped_samples,
                report.totals.intervals() + report.skipped_samples
            );
        }
        self.coordinator.shutdown(ShutdownReason::TunnelExited);
        Ok(())
    }

    fn launch_failed(&mut self, e: AgentError) -> AgentError {
        error!("{}", e);
        self.say("SSH connection failed");
        self.coordinator.shutdown(ShutdownReason::LaunchFailed);
        e
    }

    fn say(&mut self, message: &str) {
        if let Err(e) = writeln!(self.console, "{message}").and_then(|_| self.console.flush()) {
            debug!("Failed to write to console: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshConfig;
    use crate::tunnel::mock::MockTunnel;
    use common::Sample;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn launcher_for(port: u16) -> TunnelLauncher {
        let config = SshConfig {
            port: 22,
            obfuscate_keyword: "kw".to_string(),
            socks_proxy: port.to_string(),
            user: "alice".to_string(),
            server: "tunnel.example.com".to_string(),
            key: PathBuf::from("/keys/id_ed25519"),
            password: String::new(),
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            extra_options: Vec::new(),
            connect_timeout_secs: 30,
            startup_grace_millis: 0,
        };
        TunnelLauncher::new(&config).unwrap()
    }

    fn quiet_coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::with_output(Box::new(io::sink()))
    }

    fn idle_monitor(interval: Duration) -> ThroughputMonitor<impl CounterSource, Vec<u8>> {
        let counters = || -> common::Result<Sample> { Ok(Sample::new(0, 0)) };
        ThroughputMonitor::new(counters, interval, Vec::new())
    }

    fn spawned(tunnel: &Arc<MockTunnel>) -> impl FnOnce() -> Result<Arc<dyn TunnelProcess>> {
        let tunnel: Arc<dyn TunnelProcess> = tunnel.clone();
        move || Ok(tunnel)
    }

    #[tokio::test]
    async fn tunnel_exit_ends_session_and_shuts_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let launcher = launcher_for(listener.local_addr().unwrap().port());
        let coordinator = quiet_coordinator();
        let tunnel = Arc::new(MockTunnel::exits_after(3));
        let mut monitor = idle_monitor(Duration::from_millis(1));
        let mut console = Vec::new();

        let result = Session::new(&launcher, &coordinator, &mut console)
            .run(spawned(&tunnel), &mut monitor)
            .await;

        assert!(result.is_ok());
        assert!(coordinator.is_shut_down());
        assert_eq!(tunnel.terminate_calls(), 0);
        assert_eq!(String::from_utf8(console).unwrap(), "Connected to tunnel.example.com\n");
    }

    #[tokio::test]
    async fn spawn_failure_reports_and_shuts_down() {
        let launcher = launcher_for(1080);
        let coordinator = quiet_coordinator();
        let mut monitor = idle_monitor(Duration::from_millis(1));
        let mut console = Vec::new();

        let result = Session::new(&launcher, &coordinator, &mut console)
            .run(
                || Err(AgentError::Launch("sshpass: not found".to_string())),
                &mut monitor,
            )
            .await;

        assert!(matches!(result, Err(AgentError::Launch(_))));
        assert!(coordinator.is_shut_down());
        assert!(coordinator.token().is_cancelled());
        assert_eq!(String::from_utf8(console).unwrap(), "SSH connection failed\n");
    }

    #[tokio::test]
    async fn client_exiting_during_startup_is_a_connection_failure() {
        let launcher = launcher_for(1080);
        let coordinator = quiet_coordinator();
        let tunnel = Arc::new(MockTunnel::exited());
        let mut monitor = idle_monitor(Duration::from_millis(1));
        let mut console = Vec::new();

        let result = Session::new(&launcher, &coordinator, &mut console)
            .run(spawned(&tunnel), &mut monitor)
            .await;

        assert!(matches!(result, Err(AgentError::ConnectionFailed(_))));
        assert!(coordinator.is_shut_down());
        let output = String::from_utf8(console).unwrap();
        assert_eq!(output, "SSH connection failed\n");
    }

    #[tokio::test]
    async fn readiness_timeout_terminates_the_client() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let launcher = launcher_for(port).with_timeouts(Some(Duration::from_millis(300)), Duration::ZERO);
        let coordinator = quiet_coordinator();
        let tunnel = Arc::new(MockTunnel::running());
        let mut monitor = idle_monitor(Duration::from_millis(1));
        let mut console = Vec::new();

        let result = Session::new(&launcher, &coordinator, &mut console)
            .run(spawned(&tunnel), &mut monitor)
            .await;

        assert!(matches!(result, Err(AgentError::ConnectionFailed(_))));
        assert_eq!(tunnel.terminate_calls(), 1);
    }

    #[tokio::test]
    async fn signal_during_monitoring_stops_the_tunnel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let launcher = launcher_for(listener.local_addr().unwrap().port());
        let coordinator = quiet_coordinator();
        let tunnel = Arc::new(MockTunnel::running());
        let mut monitor = idle_monitor(Duration::from_secs(3_600));
        let mut console = Vec::new();
        let mut session = Session::new(&launcher, &coordinator, &mut console);

        let (result, performed) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(session.run(spawned(&tunnel), &mut monitor), async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                coordinator.shutdown(ShutdownReason::Signal("SIGINT"))
            })
        })
        .await
        .expect("signal should end the session promptly");
        drop(session);

        assert!(result.is_ok());
        assert!(performed);
        assert_eq!(tunnel.terminate_calls(), 1);
        assert!(!coordinator.shutdown(ShutdownReason::Exit));
        assert_eq!(String::from_utf8(console).unwrap(), "Connected to tunnel.example.com\n");
    }

    #[tokio::test]
    async fn nothing_is_spawned_after_shutdown() {
        let launcher = launcher_for(1080);
        let coordinator = quiet_coordinator();
        coordinator.shutdown(ShutdownReason::Signal("SIGTERM"));
        let mut monitor = idle_monitor(Duration::from_millis(1));

        let result = Session::new(&launcher, &coordinator, io::sink())
            .run(|| panic!("spawned after shutdown"), &mut monitor)
            .await;

        assert!(result.is_ok());
    }
}
