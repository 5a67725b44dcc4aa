//! HTTP read API over the snapshot cache and the history store.
//!
//! | Route                      | Source   |
//! |----------------------------|----------|
//! | `GET /live`                | snapshot |
//! | `GET /live/{vehicle_id}`   | snapshot |
//! | `GET /history`             | newest batch, grouped by observed timestamp |
//! | `GET /history/batch/{id}`  | one batch, grouped by observed timestamp |
//! | `GET /history/all_batch_ids` | every persisted batch id |

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::error::{PersistenceError, SnapshotError};
use crate::history::{HistoryStore, SqliteHistoryStore};
use crate::record::{BatchId, Snapshot, VehiclePositionRecord};
use crate::snapshot::SnapshotCache;

/// Records keyed by their observed timestamp.
pub type GroupedRecords = BTreeMap<i64, Vec<VehiclePositionRecord>>;

#[derive(Clone)]
pub struct ApiState {
    snapshot: SnapshotCache,
    history: Arc<Mutex<SqliteHistoryStore>>,
}

impl ApiState {
    pub fn new(snapshot: SnapshotCache, history: SqliteHistoryStore) -> Self {
        Self {
            snapshot,
            history: Arc::new(Mutex::new(history)),
        }
    }

    /// Runs `f` against the history store on the blocking pool. Requests
    /// share one connection and are serialized on its lock.
    async fn with_history<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteHistoryStore) -> Result<T, PersistenceError> + Send + 'static,
    {
        let history = Arc::clone(&self.history);
        tokio::task::spawn_blocking(move || -> Result<T, ApiError> {
            let store = history.lock().map_err(|_| ApiError::Unavailable)?;
            Ok(f(&store)?)
        })
        .await
        .map_err(|_| ApiError::Unavailable)?
    }

    /// Reads the snapshot file on the blocking pool.
    async fn load_snapshot(&self) -> Result<Snapshot, ApiError> {
        let cache = self.snapshot.clone();
        tokio::task::spawn_blocking(move || cache.load())
            .await
            .map_err(|_| ApiError::Unavailable)??
            .ok_or(ApiError::NoData)
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// No snapshot has been written yet.
    NoData,
    NotFound(String),
    Snapshot(SnapshotError),
    History(PersistenceError),
    /// The store lock is poisoned or the blocking task died.
    Unavailable,
}

impl From<SnapshotError> for ApiError {
    fn from(e: SnapshotError) -> Self {
        Self::Snapshot(e)
    }
}

impl From<PersistenceError> for ApiError {
    fn from(e: PersistenceError) -> Self {
        Self::History(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::NoData => (StatusCode::SERVICE_UNAVAILABLE, "no data yet".to_string()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            Self::Snapshot(e) => {
                error!(error = %e, "Snapshot read failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::History(e) => {
                error!(error = %e, "History query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "history store unavailable".to_string(),
            ),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/live", get(live))
        .route("/live/{vehicle_id}", get(live_vehicle))
        .route("/history", get(history_latest))
        .route("/history/batch/{batch_id}", get(history_batch))
        .route("/history/all_batch_ids", get(all_batch_ids))
        .with_state(state)
}

/// Binds `addr` and serves the read API until the process exits.
pub async fn serve(addr: SocketAddr, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Read API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn group_by_observed(records: Vec<VehiclePositionRecord>) -> GroupedRecords {
    let mut grouped = GroupedRecords::new();
    for r in records {
        grouped.entry(r.observed_timestamp).or_default().push(r);
    }
    grouped
}

pub async fn live(State(state): State<ApiState>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = state.load_snapshot().await?;
    Ok(Json(snapshot))
}

pub async fn live_vehicle(
    State(state): State<ApiState>,
    Path(vehicle_id): Path<String>,
) -> Result<Json<VehiclePositionRecord>, ApiError> {
    let mut snapshot = state.load_snapshot().await?;
    snapshot
        .remove(&vehicle_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("vehicle {vehicle_id}")))
}

pub async fn history_latest(
    State(state): State<ApiState>,
) -> Result<Json<GroupedRecords>, ApiError> {
    let records = state.with_history(|h| h.latest_batch()).await?;
    Ok(Json(group_by_observed(records)))
}

pub async fn history_batch(
    State(state): State<ApiState>,
    Path(batch_id): Path<i64>,
) -> Result<Json<GroupedRecords>, ApiError> {
    let records = state.with_history(move |h| h.batch(BatchId(batch_id))).await?;
    Ok(Json(group_by_observed(records)))
}

pub async fn all_batch_ids(
    State(state): State<ApiState>,
) -> Result<Json<BTreeSet<BatchId>>, ApiError> {
    let ids = state.with_history(|h| h.batch_ids()).await?;
    Ok(Json(ids))
}
