//! Protobuf decoding of GTFS Realtime vehicle-position feeds.

use std::collections::HashMap;
use std::str::FromStr;

use prost::Message;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::gtfs_rt::{FeedEntity, FeedMessage, VehiclePosition};
use crate::record::{BatchId, VehiclePositionRecord};

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage, DecodeError> {
    Ok(FeedMessage::decode(bytes)?)
}

/// What a feed entity carries. An entity may populate several payloads; the
/// vehicle position wins, then trip update, alert, shape, stop, trip
/// modifications.
#[derive(Debug, Clone, Copy)]
pub enum EntityKind<'a> {
    VehiclePosition(&'a VehiclePosition),
    TripUpdate,
    Alert,
    Shape,
    Stop,
    TripModifications,
    Empty,
}

impl<'a> EntityKind<'a> {
    pub fn classify(entity: &'a FeedEntity) -> Self {
        if let Some(v) = &entity.vehicle {
            Self::VehiclePosition(v)
        } else if entity.trip_update.is_some() {
            Self::TripUpdate
        } else if entity.alert.is_some() {
            Self::Alert
        } else if entity.shape.is_some() {
            Self::Shape
        } else if entity.stop.is_some() {
            Self::Stop
        } else if entity.trip_modifications.is_some() {
            Self::TripModifications
        } else {
            Self::Empty
        }
    }
}

/// Resolution for a vehicle id that appears more than once in one payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    #[default]
    KeepFirst,
    KeepLast,
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-first" => Ok(Self::KeepFirst),
            "keep-last" => Ok(Self::KeepLast),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown duplicate policy '{other}' (expected keep-first, keep-last or reject)"
            )),
        }
    }
}

/// Per-payload counters, logged once per cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub entities: usize,
    pub vehicle_entities: usize,
    pub emitted: usize,
    pub skipped_no_trip: usize,
    pub skipped_no_vehicle_id: usize,
    pub skipped_no_position: usize,
    pub skipped_bad_timestamp: usize,
    pub duplicates: usize,
}

/// Records decoded from one payload, not yet stamped with a batch.
#[derive(Debug, Clone)]
pub struct DecodedFeed {
    pub feed_timestamp: u64,
    pub records: Vec<VehiclePositionRecord>,
    pub report: DecodeReport,
}

/// Decodes a payload into trip-bound vehicle-position records.
///
/// One record is emitted per entity carrying a vehicle position with a trip
/// reference, a vehicle id and a position. `observed_timestamp` is the
/// vehicle's own timestamp, falling back to the header timestamp when the
/// vehicle omits it. Entities whose timestamp does not fit an `i64` are
/// skipped and counted.
///
/// # Errors
///
/// [`DecodeError::Protobuf`] for malformed payloads, and
/// [`DecodeError::DuplicateVehicle`] under [`DuplicatePolicy::Reject`].
pub fn decode(bytes: &[u8], duplicates: DuplicatePolicy) -> Result<DecodedFeed, DecodeError> {
    let feed = parse_feed(bytes)?;
    let feed_timestamp = feed.header.timestamp.unwrap_or_default();

    let mut report = DecodeReport {
        entities: feed.entity.len(),
        ..Default::default()
    };
    let mut records: Vec<VehiclePositionRecord> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entity in &feed.entity {
        let EntityKind::VehiclePosition(vp) = EntityKind::classify(entity) else {
            continue;
        };
        report.vehicle_entities += 1;

        let Some(trip) = &vp.trip else {
            report.skipped_no_trip += 1;
            continue;
        };
        let Some(vehicle_id) = vp
            .vehicle
            .as_ref()
            .and_then(|v| v.id.clone())
            .filter(|id| !id.is_empty())
        else {
            report.skipped_no_vehicle_id += 1;
            warn!(entity_id = %entity.id, "Vehicle entity has no vehicle id, skipping");
            continue;
        };
        let Some(position) = &vp.position else {
            report.skipped_no_position += 1;
            warn!(entity_id = %entity.id, vehicle_id = %vehicle_id, "Vehicle entity has no position, skipping");
            continue;
        };
        let raw_timestamp = vp.timestamp.unwrap_or(feed_timestamp);
        let Ok(observed_timestamp) = i64::try_from(raw_timestamp) else {
            report.skipped_bad_timestamp += 1;
            warn!(entity_id = %entity.id, vehicle_id = %vehicle_id, timestamp = raw_timestamp, "Vehicle timestamp out of range, skipping");
            continue;
        };

        let record = VehiclePositionRecord {
            id: None,
            batch_id: BatchId::default(),
            fetch_timestamp: 0,
            observed_timestamp,
            trip_id: trip.trip_id.clone(),
            route_id: trip.route_id.clone(),
            vehicle_label: vp
                .vehicle
                .as_ref()
                .and_then(|v| v.label.clone())
                .unwrap_or_default(),
            vehicle_id,
            latitude: f64::from(position.latitude),
            longitude: f64::from(position.longitude),
            bearing: position.bearing.map(f64::from),
            odometer: position.odometer,
            speed: position.speed.map(f64::from),
            apparent_velocity_lat: None,
            apparent_velocity_long: None,
        };

        match seen.get(&record.vehicle_id) {
            None => {
                seen.insert(record.vehicle_id.clone(), records.len());
                records.push(record);
            }
            Some(&idx) => {
                report.duplicates += 1;
                warn!(
                    entity_id = %entity.id,
                    vehicle_id = %record.vehicle_id,
                    policy = ?duplicates,
                    "Duplicate vehicle in feed"
                );
                match duplicates {
                    DuplicatePolicy::KeepFirst => {}
                    DuplicatePolicy::KeepLast => records[idx] = record,
                    DuplicatePolicy::Reject => {
                        return Err(DecodeError::DuplicateVehicle {
                            vehicle_id: record.vehicle_id,
                        });
                    }
                }
            }
        }
    }

    report.emitted = records.len();
    debug!(?report, feed_timestamp, "Feed decoded");

    Ok(DecodedFeed {
        feed_timestamp,
        records,
        report,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gtfs_rt::{
        Alert, FeedHeader, Position, TripDescriptor, TripUpdate, VehicleDescriptor,
    };

    pub(crate) fn header(timestamp: u64) -> FeedHeader {
        FeedHeader {
            gtfs_realtime_version: "2.0".to_string(),
            timestamp: Some(timestamp),
            incrementality: None,
            feed_version: None,
        }
    }

    pub(crate) fn vehicle_entity(
        entity_id: &str,
        vehicle_id: &str,
        timestamp: u64,
        lat: f32,
        lon: f32,
    ) -> FeedEntity {
        FeedEntity {
            id: entity_id.to_string(),
            vehicle: Some(VehiclePosition {
                trip: Some(TripDescriptor {
                    trip_id: Some(format!("trip-{vehicle_id}")),
                    route_id: Some("14".to_string()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(vehicle_id.to_string()),
                    label: Some(format!("bus {vehicle_id}")),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: lat,
                    longitude: lon,
                    bearing: Some(90.0),
                    odometer: None,
                    speed: Some(4.5),
                }),
                timestamp: Some(timestamp),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub(crate) fn encode(entity: Vec<FeedEntity>) -> Vec<u8> {
        FeedMessage {
            header: header(1_700_000_000),
            entity,
        }
        .encode_to_vec()
    }

    #[test]
    fn test_parse_empty_bytes_returns_default_feed() {
        // An empty byte array decodes to a FeedMessage with default values
        let feed = parse_feed(&[]).unwrap();
        assert_eq!(feed.header.gtfs_realtime_version, "");
        assert!(feed.entity.is_empty());
    }

    #[test]
    fn test_parse_invalid_bytes() {
        let invalid_bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        let result = decode(&invalid_bytes, DuplicatePolicy::default());
        assert!(matches!(result, Err(DecodeError::Protobuf(_))));
    }

    #[test]
    fn test_decode_maps_vehicle_fields() {
        let bytes = encode(vec![vehicle_entity("e1", "A", 100, 37.75, -122.5)]);
        let decoded = decode(&bytes, DuplicatePolicy::default()).unwrap();

        assert_eq!(decoded.feed_timestamp, 1_700_000_000);
        assert_eq!(decoded.records.len(), 1);
        let r = &decoded.records[0];
        assert_eq!(r.vehicle_id, "A");
        assert_eq!(r.vehicle_label, "bus A");
        assert_eq!(r.trip_id.as_deref(), Some("trip-A"));
        assert_eq!(r.route_id.as_deref(), Some("14"));
        assert_eq!(r.observed_timestamp, 100);
        assert_eq!(r.latitude, f64::from(37.75f32));
        assert_eq!(r.bearing, Some(90.0));
        assert_eq!(r.speed, Some(4.5));
        assert_eq!(r.odometer, None);
        assert_eq!(r.id, None);
        assert!(!r.has_velocity());
    }

    #[test]
    fn test_decode_skips_vehicles_without_trip() {
        let mut untripped = vehicle_entity("e2", "B", 100, 1.0, 1.0);
        if let Some(v) = untripped.vehicle.as_mut() {
            v.trip = None;
        }
        let bytes = encode(vec![vehicle_entity("e1", "A", 100, 1.0, 1.0), untripped]);
        let decoded = decode(&bytes, DuplicatePolicy::default()).unwrap();

        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.report.skipped_no_trip, 1);
        assert_eq!(decoded.report.vehicle_entities, 2);
    }

    #[test]
    fn test_decode_ignores_other_entity_kinds() {
        let trip_update = FeedEntity {
            id: "tu".to_string(),
            trip_update: Some(TripUpdate::default()),
            ..Default::default()
        };
        let alert = FeedEntity {
            id: "al".to_string(),
            alert: Some(Alert::default()),
            ..Default::default()
        };
        assert!(matches!(EntityKind::classify(&trip_update), EntityKind::TripUpdate));
        assert!(matches!(EntityKind::classify(&alert), EntityKind::Alert));

        let bytes = encode(vec![trip_update, alert, vehicle_entity("e1", "A", 1, 0.0, 0.0)]);
        let decoded = decode(&bytes, DuplicatePolicy::default()).unwrap();

        assert_eq!(decoded.report.entities, 3);
        assert_eq!(decoded.report.vehicle_entities, 1);
        assert_eq!(decoded.records.len(), 1);
    }

    #[test]
    fn test_decode_empty_entity_list_yields_no_records() {
        let decoded = decode(&encode(vec![]), DuplicatePolicy::default()).unwrap();
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.report, DecodeReport::default());
    }

    #[test]
    fn test_decode_falls_back_to_header_timestamp() {
        let mut entity = vehicle_entity("e1", "A", 0, 1.0, 1.0);
        if let Some(v) = entity.vehicle.as_mut() {
            v.timestamp = None;
        }
        let decoded = decode(&encode(vec![entity]), DuplicatePolicy::default()).unwrap();
        assert_eq!(decoded.records[0].observed_timestamp, 1_700_000_000);
    }

    #[test]
    fn test_decode_skips_missing_vehicle_id_and_position() {
        let mut no_id = vehicle_entity("e1", "A", 1, 1.0, 1.0);
        if let Some(v) = no_id.vehicle.as_mut() {
            v.vehicle = None;
        }
        let mut no_pos = vehicle_entity("e2", "B", 1, 1.0, 1.0);
        if let Some(v) = no_pos.vehicle.as_mut() {
            v.position = None;
        }
        let decoded = decode(&encode(vec![no_id, no_pos]), DuplicatePolicy::default()).unwrap();

        assert!(decoded.records.is_empty());
        assert_eq!(decoded.report.skipped_no_vehicle_id, 1);
        assert_eq!(decoded.report.skipped_no_position, 1);
    }

    #[test]
    fn test_decode_skips_timestamp_beyond_i64() {
        let bytes = encode(vec![
            vehicle_entity("e1", "A", 1 << 63, 1.0, 1.0),
            vehicle_entity("e2", "B", i64::MAX as u64, 1.0, 1.0),
        ]);
        let decoded = decode(&bytes, DuplicatePolicy::default()).unwrap();

        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].vehicle_id, "B");
        assert_eq!(decoded.records[0].observed_timestamp, i64::MAX);
        assert_eq!(decoded.report.skipped_bad_timestamp, 1);
    }

    #[test]
    fn test_duplicate_keep_first() {
        let bytes = encode(vec![
            vehicle_entity("e1", "A", 100, 1.0, 1.0),
            vehicle_entity("e2", "A", 105, 2.0, 2.0),
        ]);
        let decoded = decode(&bytes, DuplicatePolicy::KeepFirst).unwrap();

        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].observed_timestamp, 100);
        assert_eq!(decoded.report.duplicates, 1);
    }

    #[test]
    fn test_duplicate_keep_last() {
        let bytes = encode(vec![
            vehicle_entity("e1", "A", 100, 1.0, 1.0),
            vehicle_entity("e2", "B", 100, 5.0, 5.0),
            vehicle_entity("e3", "A", 105, 2.0, 2.0),
        ]);
        let decoded = decode(&bytes, DuplicatePolicy::KeepLast).unwrap();

        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].vehicle_id, "A");
        assert_eq!(decoded.records[0].observed_timestamp, 105);
    }

    #[test]
    fn test_duplicate_reject() {
        let bytes = encode(vec![
            vehicle_entity("e1", "A", 100, 1.0, 1.0),
            vehicle_entity("e2", "A", 105, 2.0, 2.0),
        ]);
        let result = decode(&bytes, DuplicatePolicy::Reject);

        assert!(matches!(
            result,
            Err(DecodeError::DuplicateVehicle { ref vehicle_id }) if vehicle_id == "A"
        ));
    }

    #[test]
    fn test_duplicate_policy_from_str() {
        assert_eq!("keep-last".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::KeepLast));
        assert!("newest".parse::<DuplicatePolicy>().is_err());
    }
}
