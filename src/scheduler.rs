//! Fixed-interval ingestion loop: fetch, decode, estimate, guard, persist,
//! snapshot, sleep.
//!
//! Cycles never overlap. Any failure inside a cycle aborts that cycle only;
//! the loop logs it, sleeps and tries again.

use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::config::IngestConfig;
use crate::error::{CycleError, FetchError, PersistenceError};
use crate::fetch::FeedSource;
use crate::guard::{GuardStatus, OverflowPolicy};
use crate::history::HistoryStore;
use crate::parser::decode;
use crate::record::{BatchClock, BatchId, snapshot_from_batch};
use crate::snapshot::SnapshotCache;
use crate::velocity;

/// Where the scheduler is within its cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CyclePhase {
    #[default]
    Idle,
    Fetching,
    Decoding,
    Estimating,
    GuardChecking,
    Persisting,
    SnapshotUpdating,
    Sleeping,
}

/// Counters carried from one cycle to the next.
#[derive(Debug, Clone, Default)]
pub struct IngestState {
    pub clock: BatchClock,
    pub cycles_run: u64,
    pub batches_ingested: u64,
    pub records_ingested: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A batch was persisted and installed as the snapshot.
    Ingested {
        batch_id: BatchId,
        records: usize,
        estimated: usize,
        guard: GuardStatus,
    },
    /// The feed held no trip-bound vehicles. Nothing was written.
    Empty { batch_id: BatchId },
}

pub struct Scheduler<S, H> {
    source: S,
    history: H,
    snapshot: SnapshotCache,
    config: IngestConfig,
    state: IngestState,
    phase: CyclePhase,
}

impl<S: FeedSource, H: HistoryStore> Scheduler<S, H> {
    /// Builds a scheduler whose batch ids continue after the newest batch
    /// already in `history`.
    pub fn new(
        source: S,
        history: H,
        snapshot: SnapshotCache,
        config: IngestConfig,
    ) -> Result<Self, PersistenceError> {
        let last = history.latest_batch_id()?;
        Ok(Self {
            source,
            history,
            snapshot,
            config,
            state: IngestState {
                clock: BatchClock::resume_after(last),
                ..Default::default()
            },
            phase: CyclePhase::Idle,
        })
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn snapshot(&self) -> &SnapshotCache {
        &self.snapshot
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    fn enter(&mut self, phase: CyclePhase) {
        trace!(from = ?self.phase, to = ?phase, "Cycle phase");
        self.phase = phase;
    }

    /// Runs cycles until `max_cycles` is reached, or forever.
    pub async fn run(&mut self) {
        match self.config.max_cycles {
            Some(n) => info!(cycles = n, "Starting ingestion"),
            None => info!(
                interval_secs = self.config.fetch_interval.as_secs(),
                "Ingesting indefinitely. Press Ctrl+C to stop."
            ),
        }

        let mut cycles = 0usize;
        loop {
            if self.config.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            cycles += 1;

            if let Err(e) = self.run_cycle().await {
                error!(error = %e, error_kind = e.kind(), "Ingestion cycle failed");
            }

            if self.config.max_cycles.is_none_or(|max| cycles < max) {
                self.enter(CyclePhase::Sleeping);
                debug!(
                    interval_secs = self.config.fetch_interval.as_secs(),
                    "Sleeping before next cycle"
                );
                tokio::time::sleep(self.config.fetch_interval).await;
            }
            self.enter(CyclePhase::Idle);
        }

        info!(
            cycles = self.state.cycles_run,
            batches = self.state.batches_ingested,
            records = self.state.records_ingested,
            "Ingestion finished"
        );
    }

    /// Performs one complete cycle and returns the scheduler to
    /// [`CyclePhase::Idle`], whatever the outcome.
    ///
    /// On error nothing from this cycle is visible: a failed fetch, decode,
    /// guard rejection or history write leaves both history and snapshot as
    /// they were.
    #[tracing::instrument(name = "ingest_cycle", skip(self), fields(batch_id))]
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let result = self.cycle().await;
        self.enter(CyclePhase::Idle);
        result
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let fetch_timestamp = Utc::now().timestamp();
        let batch_id = self.state.clock.next(fetch_timestamp);
        self.state.cycles_run += 1;
        tracing::Span::current().record("batch_id", batch_id.0);

        self.enter(CyclePhase::Fetching);
        let fetch_start = Instant::now();
        let timeout = self.config.fetch_timeout;
        let payload = match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(timeout).into()),
        };
        let elapsed = fetch_start.elapsed();
        if elapsed.as_secs() > 15 {
            warn!(elapsed_secs = elapsed.as_secs(), "Feed fetch was slow");
        }

        self.enter(CyclePhase::Decoding);
        let decoded = decode(&payload, self.config.duplicate_policy)?;
        let mut records = decoded.records;
        if records.is_empty() {
            info!(
                entities = decoded.report.entities,
                "No trip-bound vehicles in feed, snapshot left unchanged"
            );
            return Ok(CycleOutcome::Empty { batch_id });
        }
        for r in &mut records {
            r.stamp(batch_id, fetch_timestamp);
        }

        self.enter(CyclePhase::Estimating);
        let previous = match self.snapshot.load() {
            Ok(snapshot) => snapshot.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Previous snapshot unreadable, skipping velocity estimates");
                Default::default()
            }
        };
        let estimated = velocity::estimate(&mut records, &previous);

        self.enter(CyclePhase::GuardChecking);
        let batch_records = records.len() as u64;
        let total_records = self.history.record_count()? + batch_records;
        let guard = self.config.guard.check(total_records, batch_records);
        if !guard.is_nominal() && self.config.overflow_policy == OverflowPolicy::RejectBatch {
            return Err(CycleError::CapacityRejected(guard));
        }

        self.enter(CyclePhase::Persisting);
        self.history.append(&mut records)?;

        self.enter(CyclePhase::SnapshotUpdating);
        self.snapshot.replace(&snapshot_from_batch(&records))?;

        self.state.batches_ingested += 1;
        self.state.records_ingested += batch_records;
        info!(
            records = records.len(),
            estimated,
            total_records,
            feed_timestamp = decoded.feed_timestamp,
            fetch_ms = elapsed.as_millis() as u64,
            "Batch ingested"
        );

        Ok(CycleOutcome::Ingested {
            batch_id,
            records: records.len(),
            estimated,
            guard,
        })
    }
}
