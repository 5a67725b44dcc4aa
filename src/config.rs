//! Runtime settings for the ingestion scheduler.

use std::time::Duration;

use crate::guard::{CapacityGuard, OverflowPolicy};
use crate::parser::DuplicatePolicy;

pub const DEFAULT_FEED_URL: &str = "http://api.511.org/transit/vehiclepositions";
pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub fetch_interval: Duration,
    /// Upper bound on a single upstream fetch.
    pub fetch_timeout: Duration,
    pub guard: CapacityGuard,
    pub overflow_policy: OverflowPolicy,
    pub duplicate_policy: DuplicatePolicy,
    /// Stop after this many cycles. `None` runs forever.
    pub max_cycles: Option<usize>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fetch_interval: DEFAULT_FETCH_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            guard: CapacityGuard::default(),
            overflow_policy: OverflowPolicy::default(),
            duplicate_policy: DuplicatePolicy::default(),
            max_cycles: None,
        }
    }
}
