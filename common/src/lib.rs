pub mod bandwidth;
pub mod counters;
pub mod error;
pub mod format;

pub use bandwidth::{RunningTotals, Sample, TrafficDelta};
pub use counters::{CounterSource, SystemCounters};
pub use error::{CommonError, Result};
pub use format::format_bytes;
