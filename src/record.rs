//! Typed vehicle-position records and the batch identifiers that tag them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one ingestion cycle. Strictly increasing across cycles.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(pub i64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One observation of one vehicle at one point in time.
///
/// Timestamps are POSIX seconds. `batch_id` and `fetch_timestamp` are zero
/// until [`VehiclePositionRecord::stamp`] is called; `id` is `None` until the
/// record has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePositionRecord {
    pub id: Option<i64>,
    pub batch_id: BatchId,
    pub fetch_timestamp: i64,
    pub observed_timestamp: i64,
    pub trip_id: Option<String>,
    pub route_id: Option<String>,
    pub vehicle_id: String,
    pub vehicle_label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: Option<f64>,
    pub odometer: Option<f64>,
    pub speed: Option<f64>,
    pub apparent_velocity_lat: Option<f64>,
    pub apparent_velocity_long: Option<f64>,
}

impl VehiclePositionRecord {
    /// Tags the record with the cycle that produced it.
    pub fn stamp(&mut self, batch_id: BatchId, fetch_timestamp: i64) {
        self.batch_id = batch_id;
        self.fetch_timestamp = fetch_timestamp;
    }

    /// Returns `true` once the velocity estimator has filled both derived fields.
    pub fn has_velocity(&self) -> bool {
        self.apparent_velocity_lat.is_some() && self.apparent_velocity_long.is_some()
    }
}

/// Latest known record per vehicle id.
pub type Snapshot = BTreeMap<String, VehiclePositionRecord>;

/// Keys a batch by vehicle id. Later records win, but batches coming out of
/// the decoder never contain duplicate ids.
pub fn snapshot_from_batch(records: &[VehiclePositionRecord]) -> Snapshot {
    records
        .iter()
        .map(|r| (r.vehicle_id.clone(), r.clone()))
        .collect()
}

/// Issues strictly increasing batch ids derived from wall-clock seconds.
///
/// If the clock has not advanced past the previous id (two cycles in the same
/// second, or a clock step backwards) the previous id plus one is used.
#[derive(Debug, Default, Clone)]
pub struct BatchClock {
    last: Option<BatchId>,
}

impl BatchClock {
    /// Starts after `last`, typically the newest batch already in history.
    pub fn resume_after(last: Option<BatchId>) -> Self {
        Self { last }
    }

    pub fn next(&mut self, now_epoch_secs: i64) -> BatchId {
        let id = match self.last {
            Some(BatchId(prev)) if now_epoch_secs <= prev => BatchId(prev + 1),
            _ => BatchId(now_epoch_secs),
        };
        self.last = Some(id);
        id
    }

    pub fn last(&self) -> Option<BatchId> {
        self.last
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn record(vehicle_id: &str, observed: i64, lat: f64, lon: f64) -> VehiclePositionRecord {
        VehiclePositionRecord {
            id: None,
            batch_id: BatchId::default(),
            fetch_timestamp: 0,
            observed_timestamp: observed,
            trip_id: Some(format!("trip-{vehicle_id}")),
            route_id: Some("14".to_string()),
            vehicle_id: vehicle_id.to_string(),
            vehicle_label: format!("label-{vehicle_id}"),
            latitude: lat,
            longitude: lon,
            bearing: None,
            odometer: None,
            speed: None,
            apparent_velocity_lat: None,
            apparent_velocity_long: None,
        }
    }

    #[test]
    fn test_stamp_sets_batch_and_fetch_time() {
        let mut r = record("A", 100, 1.0, 2.0);
        r.stamp(BatchId(42), 1_700_000_000);

        assert_eq!(r.batch_id, BatchId(42));
        assert_eq!(r.fetch_timestamp, 1_700_000_000);
        assert_eq!(r.observed_timestamp, 100);
    }

    #[test]
    fn test_batch_clock_uses_wall_clock_when_it_advances() {
        let mut clock = BatchClock::default();
        assert_eq!(clock.next(1000), BatchId(1000));
        assert_eq!(clock.next(1010), BatchId(1010));
    }

    #[test]
    fn test_batch_clock_is_strictly_increasing_within_one_second() {
        let mut clock = BatchClock::default();
        let a = clock.next(1000);
        let b = clock.next(1000);
        let c = clock.next(999);

        assert!(a < b && b < c);
        assert_eq!(c, BatchId(1002));
    }

    #[test]
    fn test_batch_clock_resumes_after_persisted_batch() {
        let mut clock = BatchClock::resume_after(Some(BatchId(5000)));
        assert_eq!(clock.next(4000), BatchId(5001));
        assert_eq!(clock.last(), Some(BatchId(5001)));
    }

    #[test]
    fn test_snapshot_from_batch_keys_by_vehicle() {
        let batch = vec![record("A", 1, 0.0, 0.0), record("B", 1, 0.0, 0.0)];
        let snapshot = snapshot_from_batch(&batch);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["B"].vehicle_id, "B");
    }
}
