//! Apparent velocity between consecutive observations of the same vehicle.

use std::collections::HashMap;

use crate::record::{Snapshot, VehiclePositionRecord};

/// Fills `apparent_velocity_lat` / `apparent_velocity_long` on every record in
/// `current` whose vehicle also appears in `previous` with an older observed
/// timestamp. Returns the number of records that received an estimate.
///
/// Velocity is `(previous - current) / dt` in degrees per second, so a
/// positive value means the vehicle moved toward decreasing latitude or
/// longitude. Downstream consumers rely on this sign. Vehicles new to
/// `current`, and pairs whose `dt` is not positive or overflows, are left
/// untouched.
pub fn estimate(current: &mut [VehiclePositionRecord], previous: &Snapshot) -> usize {
    let by_vehicle: HashMap<String, usize> = current
        .iter()
        .enumerate()
        .map(|(i, r)| (r.vehicle_id.clone(), i))
        .collect();

    let mut estimated = 0;
    for (vehicle_id, prev) in previous {
        let Some(&idx) = by_vehicle.get(vehicle_id) else {
            continue;
        };
        let curr = &mut current[idx];

        let Some(dt) = curr.observed_timestamp.checked_sub(prev.observed_timestamp) else {
            continue;
        };
        if dt > 0 {
            let dt = dt as f64;
            curr.apparent_velocity_lat = Some((prev.latitude - curr.latitude) / dt);
            curr.apparent_velocity_long = Some((prev.longitude - curr.longitude) / dt);
            estimated += 1;
        }
    }
    estimated
}
