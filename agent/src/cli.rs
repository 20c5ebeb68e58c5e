use crate::config::TunnelConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "socks-tunnel")]
#[command(author, version, about = "SOCKS tunnel over ssh with live throughput", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (.ini or .toml)
    #[arg(short, long, default_value = "config.ini", env = "TUNNEL_CONFIG")]
    pub config: String,

    /// Override ssh server
    #[arg(long)]
    pub server: Option<String>,

    /// Override ssh user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Override local SOCKS bind ("port" or "host:port")
    #[arg(short, long)]
    pub socks: Option<String>,

    /// Override sampling interval in milliseconds
    #[arg(long)]
    pub interval_millis: Option<u64>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log directory
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Print the ssh command line and exit without connecting
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn apply_overrides(&self, config: &mut TunnelConfig) {
        if let Some(server) = &self.server {
            config.ssh.server = server.clone();
        }
        if let Some(user) = &self.user {
            config.ssh.user = user.clone();
        }
        if let Some(socks) = &self.socks {
            config.ssh.socks_proxy = socks.clone();
        }
        if let Some(interval_millis) = self.interval_millis {
            config.monitor.interval_millis = interval_millis;
        }
        if let Some(log_level) = &self.log_level {
            config.log.level = log_level.clone();
        }
        if let Some(log_dir) = &self.log_dir {
            config.log.dir = Some(log_dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogConfig, MonitorConfig, SshConfig};
    use std::path::PathBuf;

    fn base_config() -> TunnelConfig {
        TunnelConfig {
            ssh: SshConfig {
                port: 22,
                obfuscate_keyword: "kw".to_string(),
                socks_proxy: "1080".to_string(),
                user: "alice".to_string(),
                server: "a.example.com".to_string(),
                key: PathBuf::from("/keys/id_rsa"),
                password: String::new(),
                ssh_program: "ssh".to_string(),
                sshpass_program: "sshpass".to_string(),
                extra_options: Vec::new(),
                connect_timeout_secs: 30,
                startup_grace_millis: 500,
            },
            monitor: MonitorConfig::default(),
            log: LogConfig::default(),
        }
    }

    #[test]
    fn defaults_to_config_ini() {
        let args = CliArgs::try_parse_from(["socks-tunnel"]).unwrap();
        assert!(!args.dry_run);
        assert!(args.server.is_none());
        if std::env::var_os("TUNNEL_CONFIG").is_none() {
            assert_eq!(args.config, "config.ini");
        }
    }

    #[test]
    fn overrides_replace_config_values() {
        let args = CliArgs::try_parse_from([
            "socks-tunnel",
            "-c",
            "tunnel.toml",
            "--server",
            "b.example.com",
            "-u",
            "bob",
            "-s",
            "127.0.0.1:9050",
            "--interval-millis",
            "500",
            "--log-level",
            "debug",
            "--log-dir",
            "/var/log/tunnel",
            "--dry-run",
        ])
        .unwrap();
        let mut config = base_config();
        args.apply_overrides(&mut config);

        assert_eq!(args.config, "tunnel.toml");
        assert!(args.dry_run);
        assert_eq!(config.ssh.server, "b.example.com");
        assert_eq!(config.ssh.user, "bob");
        assert_eq!(config.ssh.socks_proxy, "127.0.0.1:9050");
        assert_eq!(config.monitor.interval_millis, 500);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.dir.as_deref(), Some("/var/log/tunnel"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_interval_override_fails_validation() {
        let args = CliArgs::try_parse_from(["socks-tunnel", "--interval-millis", "0"]).unwrap();
        let mut config = base_config();
        args.apply_overrides(&mut config);
        assert!(config.validate().is_err());
    }
}
