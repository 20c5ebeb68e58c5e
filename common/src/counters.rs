use crate::bandwidth::Sample;
use crate::error::{CommonError, Result};
use sysinfo::Networks;
use tracing::debug;

/// Source of absolute, host-wide network byte counters
pub trait CounterSource {
    fn sample(&mut self) -> Result<Sample>;
}

impl<F> CounterSource for F
where
    F: FnMut() -> Result<Sample>,
{
    fn sample(&mut self) -> Result<Sample> {
        self()
    }
}

/// Counters summed over the host's network interfaces, read through sysinfo
pub struct SystemCounters {
    networks: Networks,
    interfaces: Vec<String>,
    exclude_loopback: bool,
}

impl SystemCounters {
    /// An empty `interfaces` list selects every interface
    pub fn new(interfaces: Vec<String>, exclude_loopback: bool) -> Self {
        let networks = Networks::new_with_refreshed_list();
        debug!(
            "Discovered network interfaces: [{}]",
            networks
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Self {
            networks,
            interfaces,
            exclude_loopback,
        }
    }

    fn includes(&self, name: &str) -> bool {
        if self.exclude_loopback && is_loopback(name) {
            return false;
        }
        self.interfaces.is_empty() || self.interfaces.iter().any(|wanted| wanted == name)
    }
}

impl CounterSource for SystemCounters {
    fn sample(&mut self) -> Result<Sample> {
        self.networks.refresh(true);

        let mut matched = 0usize;
        let mut bytes_sent = 0u64;
        let mut bytes_received = 0u64;
        for (name, data) in self.networks.iter() {
            if !self.includes(name) {
                continue;
            }
            matched += 1;
            bytes_sent = bytes_sent.saturating_add(data.total_transmitted());
            bytes_received = bytes_received.saturating_add(data.total_received());
        }

        if matched == 0 {
            return Err(CommonError::Counters(if self.interfaces.is_empty() {
                "no network interfaces found".to_string()
            } else {
                format!("none of [{}] are present", self.interfaces.join(", "))
            }));
        }

        Ok(Sample::new(bytes_sent, bytes_received))
    }
}

fn is_loopback(name: &str) -> bool {
    name == "lo" || name.starts_with("lo0") || name.to_ascii_lowercase().contains("loopback")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_counter_source() {
        let mut calls = 0u64;
        let mut source = move || {
            calls += 1;
            Ok(Sample::new(calls * 10, calls * 20))
        };

        assert_eq!(source.sample().unwrap().bytes_sent, 10);
        assert_eq!(source.sample().unwrap().bytes_received, 40);
    }

    #[test]
    fn test_interface_filter() {
        let counters = SystemCounters {
            networks: Networks::new(),
            interfaces: vec!["eth0".to_string(), "lo".to_string()],
            exclude_loopback: true,
        };

        assert!(counters.includes("eth0"));
        assert!(!counters.includes("lo"));
        assert!(!counters.includes("wlan0"));
    }

    #[test]
    fn test_missing_interface_is_an_error() {
        let mut counters = SystemCounters::new(vec!["no-such-iface0".to_string()], false);
        let err = counters.sample().unwrap_err();
        assert!(err.to_string().contains("no-such-iface0"));
    }

    #[test]
    fn test_loopback_names() {
        assert!(is_loopback("lo"));
        assert!(is_loopback("lo0"));
        assert!(is_loopback("Loopback Pseudo-Interface 1"));
        assert!(!is_loopback("eth0"));
    }
}
