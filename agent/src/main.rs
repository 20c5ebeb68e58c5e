mod cli;
mod config;
mod error;
mod launcher;
mod monitor;
mod session;
mod shutdown;
mod telemetry;
mod tunnel;

use anyhow::{Context, Result};
use clap::Parser;
use common::SystemCounters;
use crate::config::TunnelConfig;
use launcher::TunnelLauncher;
use monitor::ThroughputMonitor;
use session::Session;
use shutdown::{ShutdownCoordinator, ShutdownReason};
use std::io;
use std::sync::Arc;
use tracing::{debug, info};
use tunnel::TunnelProcess;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::CliArgs::parse();

    // Load configuration
    let mut cfg = TunnelConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    // Override with command line arguments
    args.apply_overrides(&mut cfg);
    cfg.validate()?;

    let _log_guard = telemetry::init_tracing(cfg.log.dir.as_deref(), &cfg.log.file, &cfg.log.level);
    debug!("Starting socks tunnel with configuration: {:?}", cfg);

    let launcher = TunnelLauncher::new(&cfg.ssh)?;
    if args.dry_run {
        println!("{}", launcher.command().command_line());
        return Ok(());
    }

    let coordinator = Arc::new(ShutdownCoordinator::new());
    shutdown::spawn_signal_listener(coordinator.clone());

    info!(
        "Authenticating to {} with {}",
        cfg.ssh.target(),
        if launcher.command().uses_password() {
            "password via sshpass"
        } else {
            "identity file only"
        }
    );

    let counters = SystemCounters::new(cfg.monitor.interfaces.clone(), cfg.monitor.exclude_loopback);
    let mut monitor = ThroughputMonitor::new(counters, cfg.monitor.interval(), io::stdout());
    let result = Session::new(&launcher, &coordinator, io::stdout())
        .run(
            || {
                let tunnel: Arc<dyn TunnelProcess> = Arc::new(launcher.spawn()?);
                Ok(tunnel)
            },
            &mut monitor,
        )
        .await;

    // Normal exit path, a no-op when a signal or a failed launch already shut us down
    coordinator.shutdown(ShutdownReason::Exit);
    Ok(result?)
}
