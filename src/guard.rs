//! Record-count ceilings for the history store.
//!
//! The guard only reports. What happens on an exceeded ceiling is decided by
//! [`OverflowPolicy`], which defaults to signalling and carrying on.

use std::str::FromStr;

use tracing::warn;

/// Outcome of a capacity check. Both ceilings may be exceeded at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStatus {
    Nominal,
    TotalExceeded,
    BatchExceeded,
    BothExceeded,
}

impl GuardStatus {
    pub fn is_nominal(self) -> bool {
        self == Self::Nominal
    }

    pub fn total_exceeded(self) -> bool {
        matches!(self, Self::TotalExceeded | Self::BothExceeded)
    }

    pub fn batch_exceeded(self) -> bool {
        matches!(self, Self::BatchExceeded | Self::BothExceeded)
    }
}

/// What the scheduler does with a batch whose check is not nominal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Log and ingest anyway.
    #[default]
    Signal,
    /// Skip the batch: nothing is persisted and the snapshot is not advanced.
    RejectBatch,
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Self::Signal),
            "reject-batch" => Ok(Self::RejectBatch),
            other => Err(format!(
                "unknown overflow policy '{other}' (expected signal or reject-batch)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityGuard {
    pub max_total_records: u64,
    pub max_batch_records: u64,
}

impl Default for CapacityGuard {
    fn default() -> Self {
        Self {
            max_total_records: 1_000_000,
            max_batch_records: 100_000,
        }
    }
}

impl CapacityGuard {
    pub fn new(max_total_records: u64, max_batch_records: u64) -> Self {
        Self {
            max_total_records,
            max_batch_records,
        }
    }

    /// Compares counts against the ceilings. A count equal to its ceiling is
    /// still nominal.
    pub fn check(&self, total_records: u64, batch_records: u64) -> GuardStatus {
        let total = total_records > self.max_total_records;
        let batch = batch_records > self.max_batch_records;

        let status = match (total, batch) {
            (false, false) => GuardStatus::Nominal,
            (true, false) => GuardStatus::TotalExceeded,
            (false, true) => GuardStatus::BatchExceeded,
            (true, true) => GuardStatus::BothExceeded,
        };

        if status.total_exceeded() {
            warn!(
                total_records,
                max_total_records = self.max_total_records,
                "Total vehicle position records exceed configured maximum"
            );
        }
        if status.batch_exceeded() {
            warn!(
                batch_records,
                max_batch_records = self.max_batch_records,
                "Vehicle position records in batch exceed configured maximum"
            );
        }

        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_at_ceiling() {
        let guard = CapacityGuard::new(10, 5);
        assert_eq!(guard.check(10, 5), GuardStatus::Nominal);
        assert!(guard.check(0, 0).is_nominal());
    }

    #[test]
    fn test_each_ceiling_independently() {
        let guard = CapacityGuard::new(10, 5);

        let total = guard.check(11, 1);
        assert_eq!(total, GuardStatus::TotalExceeded);
        assert!(total.total_exceeded() && !total.batch_exceeded());

        let batch = guard.check(1, 6);
        assert_eq!(batch, GuardStatus::BatchExceeded);
        assert!(batch.batch_exceeded() && !batch.total_exceeded());
    }

    #[test]
    fn test_both_exceeded() {
        let status = CapacityGuard::new(10, 5).check(100, 50);
        assert_eq!(status, GuardStatus::BothExceeded);
        assert!(status.total_exceeded() && status.batch_exceeded());
    }

    #[test]
    fn test_default_ceilings() {
        let guard = CapacityGuard::default();
        assert_eq!(guard.max_total_records, 1_000_000);
        assert_eq!(guard.max_batch_records, 100_000);
    }

    #[test]
    fn test_overflow_policy_from_str() {
        assert_eq!("signal".parse::<OverflowPolicy>(), Ok(OverflowPolicy::Signal));
        assert_eq!(
            "reject-batch".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::RejectBatch)
        );
        assert!("evict".parse::<OverflowPolicy>().is_err());
    }
}
