use crate::tunnel::{TunnelExit, TunnelProcess};
use common::{CounterSource, RunningTotals, Sample, TrafficDelta, format_bytes};
use std::io::Write;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a monitoring session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    TunnelExited(TunnelExit),
    Cancelled,
    TunnelLost(String),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub totals: RunningTotals,
    pub end: SessionEnd,
    pub skipped_samples: u64,
}

/// Samples host counters once per interval and renders a live status line
pub struct ThroughputMonitor<C, W> {
    counters: C,
    interval: Duration,
    out: W,
    last_line_len: usize,
}

impl<C, W> ThroughputMonitor<C, W>
where
    C: CounterSource,
    W: Write,
{
    pub fn new(counters: C, interval: Duration, out: W) -> Self {
        Self {
            counters,
            interval,
            out,
            last_line_len: 0,
        }
    }

    /// Run one monitoring session until the tunnel exits or `shutdown` fires.
    ///
    /// A baseline sample is taken before the first interval so the first
    /// reported delta is real traffic, not the host's absolute counters.
    /// Failed samples are skipped without ending the session.
    pub async fn run(
        &mut self,
        tunnel: &dyn TunnelProcess,
        shutdown: &CancellationToken,
    ) -> SessionReport {
        let mut totals = RunningTotals::new();
        let mut previous = self.read_sample();
        let mut skipped_samples = u64::from(previous.is_none());

        let end = loop {
            match tunnel.try_exit() {
                Ok(Some(exit)) => break SessionEnd::TunnelExited(exit),
                Ok(None) => {}
                Err(e) => break SessionEnd::TunnelLost(e.to_string()),
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break SessionEnd::Cancelled,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let Some(current) = self.read_sample() else {
                skipped_samples += 1;
                continue;
            };
            let Some(baseline) = previous.replace(current) else {
                debug!("Baseline sample taken");
                continue;
            };

            let delta = current.delta_since(&baseline);
            if delta.reset_detected {
                self.finish_line();
                warn!(
                    "Network counters went backwards (sent {} -> {}, received {} -> {}), counting the interval as zero",
                    baseline.bytes_sent,
                    current.bytes_sent,
                    baseline.bytes_received,
                    current.bytes_received
                );
            }
            totals.record(&delta);

            if let Err(e) = self.render(&delta, &totals) {
                debug!("Failed to write status line: {}", e);
            }
        };

        // a cancelled session already had its line broken by the shutdown message
        if end != SessionEnd::Cancelled {
            self.finish_line();
        }
        info!(
            "Monitoring ended ({:?}): sent {}, received {} in {}s",
            end,
            format_bytes(totals.total_sent()),
            format_bytes(totals.total_received()),
            totals.elapsed().as_secs()
        );

        SessionReport {
            totals,
            end,
            skipped_samples,
        }
    }

    fn read_sample(&mut self) -> Option<Sample> {
        match self.counters.sample() {
            Ok(sample) => Some(sample),
            Err(e) => {
                // keep the log line off the status line
                self.finish_line();
                warn!("Skipping interval, failed to read network counters: {}", e);
                None
            }
        }
    }

    fn render(&mut self, delta: &TrafficDelta, totals: &RunningTotals) -> std::io::Result<()> {
        let line = status_line(delta, totals);
        let width = line.chars().count();
        let padding = self.last_line_len.saturating_sub(width);
        self.last_line_len = width;

        write!(self.out, "\r{}{}", line, " ".repeat(padding))?;
        self.out.flush()
    }

    fn finish_line(&mut self) {
        if self.last_line_len > 0 {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.last_line_len = 0;
        }
    }
}

pub fn status_line(delta: &TrafficDelta, totals: &RunningTotals) -> String {
    format!(
        "Current ↑ {}/s | ↓ {}/s | Total ↑ {} | ↓ {} | Time {}s",
        format_bytes(delta.sent_per_second()),
        format_bytes(delta.received_per_second()),
        format_bytes(totals.total_sent()),
        format_bytes(totals.total_received()),
        totals.elapsed().as_secs()
    )
}
