use std::time::{Duration, Instant};

/// Point-in-time reading of the host's cumulative network byte counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub taken_at: Instant,
}

impl Sample {
    pub fn new(bytes_sent: u64, bytes_received: u64) -> Self {
        Self::at(bytes_sent, bytes_received, Instant::now())
    }

    pub fn at(bytes_sent: u64, bytes_received: u64, taken_at: Instant) -> Self {
        Self {
            bytes_sent,
            bytes_received,
            taken_at,
        }
    }

    /// Traffic observed between `previous` and this sample.
    ///
    /// Counters that went backwards (interface restart, counter wrap) yield a
    /// zero delta for that direction and set `reset_detected`.
    pub fn delta_since(&self, previous: &Sample) -> TrafficDelta {
        let reset_detected = self.bytes_sent < previous.bytes_sent
            || self.bytes_received < previous.bytes_received;

        TrafficDelta {
            sent: self.bytes_sent.saturating_sub(previous.bytes_sent),
            received: self.bytes_received.saturating_sub(previous.bytes_received),
            elapsed: self.taken_at.saturating_duration_since(previous.taken_at),
            reset_detected,
        }
    }
}

/// Difference between two consecutive samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficDelta {
    pub sent: u64,
    pub received: u64,
    pub elapsed: Duration,
    pub reset_detected: bool,
}

impl TrafficDelta {
    /// Upload rate in bytes per second
    pub fn sent_per_second(&self) -> u64 {
        per_second(self.sent, self.elapsed)
    }

    /// Download rate in bytes per second
    pub fn received_per_second(&self) -> u64 {
        per_second(self.received, self.elapsed)
    }
}

fn per_second(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        (bytes as f64 / secs).round() as u64
    } else {
        bytes
    }
}

/// Bytes accumulated since the current monitoring session began
#[derive(Debug, Clone)]
pub struct RunningTotals {
    total_sent: u64,
    total_received: u64,
    intervals: u64,
    start_time: Instant,
}

impl RunningTotals {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start_time: Instant) -> Self {
        Self {
            total_sent: 0,
            total_received: 0,
            intervals: 0,
            start_time,
        }
    }

    /// Add one interval's traffic to the totals
    pub fn record(&mut self, delta: &TrafficDelta) {
        self.total_sent = self.total_sent.saturating_add(delta.sent);
        self.total_received = self.total_received.saturating_add(delta.received);
        self.intervals += 1;
    }

    pub fn total_sent(&self) -> u64 {
        self.total_sent
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// Number of intervals recorded so far
    pub fn intervals(&self) -> u64 {
        self.intervals
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for RunningTotals {
    fn default() -> Self {
        Self::new()
    }
}
