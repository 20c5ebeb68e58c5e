use crate::config::{SocksBind, SshConfig};
use crate::error::{AgentError, Result};
use crate::tunnel::{TunnelHandle, TunnelProcess};
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PROBE_INTERVAL: Duration = Duration::from_millis(200);
const SSHPASS_ENV: &str = "SSHPASS";

/// Command line of the external ssh client
#[derive(Clone)]
pub struct SshCommand {
    program: String,
    args: Vec<String>,
    password: Option<String>,
}

impl SshCommand {
    pub fn from_config(config: &SshConfig) -> Self {
        let mut args = Vec::new();
        let (program, password) = if config.password.is_empty() {
            (config.ssh_program.clone(), None)
        } else {
            args.push("-e".to_string());
            args.push(config.ssh_program.clone());
            (config.sshpass_program.clone(), Some(config.password.clone()))
        };

        args.extend([
            "-p".to_string(),
            config.port.to_string(),
            "-o".to_string(),
            format!("ObfuscateKeyword={}", config.obfuscate_keyword),
            "-o".to_string(),
            "LogLevel=QUIET".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ]);
        for option in &config.extra_options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        // stdin is detached, so no remote command may be requested
        args.push("-N".to_string());
        args.extend([
            "-D".to_string(),
            config.socks_proxy.clone(),
            "-i".to_string(),
            config.key.display().to_string(),
            config.target(),
        ]);

        Self {
            program,
            args,
            password,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn uses_password(&self) -> bool {
        self.password.is_some()
    }

    /// Shell-like rendering; the password travels in the environment and never appears here
    pub fn command_line(&self) -> String {
        let mut line = String::new();
        if self.password.is_some() {
            line.push_str(SSHPASS_ENV);
            line.push_str("=*** ");
        }
        line.push_str(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        if let Some(password) = &self.password {
            command.env(SSHPASS_ENV, password);
        }
        // keep terminal signals away from the child, shutdown is ours to deliver
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

/// Outcome of waiting for a freshly spawned tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Cancelled,
}

/// Starts the ssh client in the background and checks that it came up
pub struct TunnelLauncher {
    command: SshCommand,
    server: String,
    socks: SocksBind,
    connect_timeout: Option<Duration>,
    startup_grace: Duration,
}

impl TunnelLauncher {
    pub fn new(config: &SshConfig) -> Result<Self> {
        Ok(Self {
            command: SshCommand::from_config(config),
            server: config.server.clone(),
            socks: config.socks_bind()?,
            connect_timeout: config.connect_timeout(),
            startup_grace: config.startup_grace(),
        })
    }

    #[cfg(test)]
    pub fn with_timeouts(mut self, connect_timeout: Option<Duration>, startup_grace: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.startup_grace = startup_grace;
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn command(&self) -> &SshCommand {
        &self.command
    }

    pub fn spawn(&self) -> Result<TunnelHandle> {
        debug!("Spawning tunnel: {}", self.command.command_line());
        let child = self.command.build().spawn().map_err(|e| {
            AgentError::Launch(format!("{}: {}", self.command.program(), e))
        })?;
        info!(
            "Tunnel process started (pid {}) towards {}",
            child.id().map_or_else(|| "?".to_string(), |pid| pid.to_string()),
            self.server
        );
        Ok(TunnelHandle::new(child))
    }

    /// Wait until the local SOCKS endpoint accepts connections and the startup
    /// grace period has passed without the client exiting.
    pub async fn wait_ready(
        &self,
        tunnel: &dyn TunnelProcess,
        shutdown: &CancellationToken,
    ) -> Result<Readiness> {
        let started = Instant::now();
        let grace_deadline = started + self.startup_grace;
        let deadline = self.connect_timeout.map(|timeout| started + timeout);
        let mut accepting = deadline.is_none();

        loop {
            if let Some(exit) = tunnel.try_exit()? {
                return Err(AgentError::ConnectionFailed(format!(
                    "ssh client exited during startup with {exit}"
                )));
            }

            if !accepting && self.probe().await {
                debug!(
                    "SOCKS endpoint {}:{} is accepting connections",
                    self.socks.probe_host(),
                    self.socks.port
                );
                accepting = true;
            }

            let now = Instant::now();
            if accepting && now >= grace_deadline {
                return Ok(Readiness::Ready);
            }
            if let Some(deadline) = deadline {
                if !accepting && now >= deadline {
                    return Err(AgentError::ConnectionFailed(format!(
                        "SOCKS endpoint {}:{} not ready after {:?}",
                        self.socks.probe_host(),
                        self.socks.port,
                        deadline - started
                    )));
                }
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(Readiness::Cancelled),
                _ = tokio::time::sleep(PROBE_INTERVAL) => {}
            }
        }
    }

    async fn probe(&self) -> bool {
        let connect = TcpStream::connect((self.socks.probe_host(), self.socks.port));
        matches!(tokio::time::timeout(PROBE_INTERVAL, connect).await, Ok(Ok(_)))
    }
}
