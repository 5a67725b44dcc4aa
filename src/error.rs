//! Error taxonomy for one ingestion cycle.
//!
//! Every failure inside a cycle is caught at the cycle boundary and reported
//! through [`CycleError`]; none of them stop the scheduler.

use std::time::Duration;

use thiserror::Error;

use crate::guard::GuardStatus;

/// The upstream feed could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned status {0}")]
    Status(u16),
    #[error("feed fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid feed url: {0}")]
    InvalidUrl(String),
}

/// The payload is not a usable vehicle-positions feed.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),
    #[error("vehicle {vehicle_id} appears more than once in the feed")]
    DuplicateVehicle { vehicle_id: String },
}

/// The history store rejected a write or a query.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The snapshot medium could not be read or replaced.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not install snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Why a cycle was aborted.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("batch rejected by capacity guard ({0:?})")]
    CapacityRejected(GuardStatus),
}

impl CycleError {
    /// Short label used as the `error_kind` log field.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Decode(_) => "decode",
            Self::Persistence(_) => "persistence",
            Self::Snapshot(_) => "snapshot",
            Self::CapacityRejected(_) => "capacity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_distinguishes_fetch_from_decode() {
        let fetch: CycleError = FetchError::Status(503).into();
        let decode: CycleError = DecodeError::DuplicateVehicle {
            vehicle_id: "A".to_string(),
        }
        .into();

        assert_eq!(fetch.kind(), "fetch");
        assert_eq!(decode.kind(), "decode");
    }

    #[test]
    fn test_display_is_transparent() {
        let err: CycleError = FetchError::Timeout(Duration::from_secs(60)).into();
        assert_eq!(err.to_string(), "feed fetch timed out after 60s");
    }
}
