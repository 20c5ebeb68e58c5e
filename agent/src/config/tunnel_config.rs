use crate::error::{AgentError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variables `TUNNEL_<SECTION>__<KEY>` override file values
const ENV_PREFIX: &str = "TUNNEL";

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    #[serde(alias = "SSH")]
    pub ssh: SshConfig,

    #[serde(default, alias = "MONITOR")]
    pub monitor: MonitorConfig,

    #[serde(default, alias = "LOG")]
    pub log: LogConfig,
}

#[derive(Clone, Deserialize)]
pub struct SshConfig {
    #[serde(alias = "PORT")]
    pub port: u16,

    #[serde(alias = "OBFUSCATE_KEYWORD")]
    pub obfuscate_keyword: String,

    /// Local dynamic forwarding bind, either "port" or "host:port"
    #[serde(alias = "SOCKS_PROXY")]
    pub socks_proxy: String,

    #[serde(alias = "USER")]
    pub user: String,

    #[serde(alias = "SERVER")]
    pub server: String,

    /// Identity file, "~" is expanded to the home directory on load
    #[serde(alias = "KEY")]
    pub key: PathBuf,

    /// Fed to the password prompt through sshpass; empty launches ssh directly
    #[serde(default, alias = "PASSWORD")]
    pub password: String,

    #[serde(default = "default_ssh_program", alias = "SSH_PROGRAM")]
    pub ssh_program: String,

    #[serde(default = "default_sshpass_program", alias = "SSHPASS_PROGRAM")]
    pub sshpass_program: String,

    /// Additional `-o` options passed verbatim
    #[serde(default, alias = "EXTRA_OPTIONS")]
    pub extra_options: Vec<String>,

    /// Upper bound for the local SOCKS endpoint to start accepting; 0 disables the probe
    #[serde(default = "default_connect_timeout_secs", alias = "CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: u64,

    /// An exit within this window after spawn is reported as a failed connection
    #[serde(default = "default_startup_grace_millis", alias = "STARTUP_GRACE_MILLIS")]
    pub startup_grace_millis: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_millis", alias = "INTERVAL_MILLIS")]
    pub interval_millis: u64,

    /// Interfaces to sum, empty means all of them
    #[serde(default, alias = "INTERFACES")]
    pub interfaces: Vec<String>,

    #[serde(default, alias = "EXCLUDE_LOOPBACK")]
    pub exclude_loopback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level", alias = "LEVEL")]
    pub level: String,

    /// Log directory for file-based logging, stderr when absent
    #[serde(default, alias = "DIR")]
    pub dir: Option<String>,

    #[serde(default = "default_log_file", alias = "FILE")]
    pub file: String,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_sshpass_program() -> String {
    "sshpass".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_startup_grace_millis() -> u64 {
    500
}

fn default_interval_millis() -> u64 {
    1_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "tunnel.log".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_millis: default_interval_millis(),
            interfaces: Vec::new(),
            exclude_loopback: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            file: default_log_file(),
        }
    }
}

impl TunnelConfig {
    /// Load from an INI or TOML file (format picked by extension), then apply
    /// environment overrides, expand the key path and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let mut config: TunnelConfig = settings.try_deserialize()?;
        config.ssh.key = expand_home(&config.ssh.key);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ssh = &self.ssh;
        if ssh.server.trim().is_empty() {
            return Err(AgentError::Configuration("ssh server is empty".into()));
        }
        if ssh.user.trim().is_empty() {
            return Err(AgentError::Configuration("ssh user is empty".into()));
        }
        if ssh.key.as_os_str().is_empty() {
            return Err(AgentError::Configuration("ssh key path is empty".into()));
        }
        if ssh.port == 0 {
            return Err(AgentError::Configuration("ssh port must not be 0".into()));
        }
        ssh.socks_bind()?;
        if self.monitor.interval_millis == 0 {
            return Err(AgentError::Configuration(
                "monitor interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl SshConfig {
    pub fn socks_bind(&self) -> Result<SocksBind> {
        self.socks_proxy.parse()
    }

    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.server)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_millis)
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("port", &self.port)
            .field("obfuscate_keyword", &self.obfuscate_keyword)
            .field("socks_proxy", &self.socks_proxy)
            .field("user", &self.user)
            .field("server", &self.server)
            .field("key", &self.key)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("ssh_program", &self.ssh_program)
            .field("sshpass_program", &self.sshpass_program)
            .field("extra_options", &self.extra_options)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("startup_grace_millis", &self.startup_grace_millis)
            .finish()
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_millis)
    }
}

/// Parsed form of the dynamic forwarding bind spec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksBind {
    pub host: Option<String>,
    pub port: u16,
}

impl SocksBind {
    /// Address a local client should dial to reach the forwarder
    pub fn probe_host(&self) -> &str {
        match self.host.as_deref() {
            None | Some("*") | Some("0.0.0.0") | Some("localhost") => "127.0.0.1",
            Some("::") => "::1",
            Some(host) => host,
        }
    }
}

impl FromStr for SocksBind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let spec = s.trim();
        let invalid = || AgentError::Configuration(format!("invalid SOCKS bind spec: {s:?}"));

        let (host, port) = match spec.parse::<u16>() {
            Ok(port) => (None, port),
            Err(_) => {
                let (host, port) = spec.rsplit_once(':').ok_or_else(invalid)?;
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                let host = (!host.is_empty()).then(|| host.to_string());
                (host, port)
            }
        };

        if port == 0 {
            return Err(invalid());
        }
        Ok(Self { host, port })
    }
}

/// Replace a leading "~" with the current user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(raw) = path.to_str() else {
        return path.to_path_buf();
    };
    let rest = match raw.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') || rest.starts_with('\\') => &rest[1..],
        _ => return path.to_path_buf(),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
