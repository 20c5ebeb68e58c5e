mod tunnel_config;

pub use tunnel_config::{SocksBind, SshConfig, TunnelConfig};
#[cfg(test)]
pub use tunnel_config::{LogConfig, MonitorConfig};
