//! CLI entry point for the GTFS-RT vehicle position ingester.
//!
//! Provides subcommands for running the ingestion loop, serving the read API
//! over the stored history and snapshot, and decoding a single payload.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use gtfs_rt_ingest::api::{self, ApiState};
use gtfs_rt_ingest::config::{self, IngestConfig};
use gtfs_rt_ingest::fetch::auth::UrlParam;
use gtfs_rt_ingest::fetch::{BasicClient, HttpFeedSource, fetch_bytes};
use gtfs_rt_ingest::guard::{CapacityGuard, OverflowPolicy};
use gtfs_rt_ingest::history::SqliteHistoryStore;
use gtfs_rt_ingest::parser::{DuplicatePolicy, decode};
use gtfs_rt_ingest::scheduler::Scheduler;
use gtfs_rt_ingest::snapshot::SnapshotCache;
use std::ffi::OsStr;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_rt_ingest")]
#[command(about = "Ingest a GTFS-RT vehicle positions feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StorageArgs {
    /// SQLite database holding the record history
    #[arg(long, env = "DATABASE_PATH", default_value = "data/database.db")]
    database: PathBuf,

    /// JSON file holding the latest record per vehicle
    #[arg(long, env = "SNAPSHOT_PATH", default_value = "data/snapshot.json")]
    snapshot: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed at a fixed interval and persist every batch
    Ingest {
        #[command(flatten)]
        storage: StorageArgs,

        /// Vehicle positions endpoint
        #[arg(long, env = "FEED_URL", default_value = config::DEFAULT_FEED_URL)]
        feed_url: String,

        /// API key sent as a query parameter
        #[arg(long, env = "FEED_API_KEY", hide_env_values = true)]
        api_key: String,

        /// Query parameter name carrying the API key
        #[arg(long, env = "FEED_API_KEY_PARAM", default_value = "api_key")]
        api_key_param: String,

        /// Transit agency identifier sent as the `agency` query parameter
        #[arg(long, env = "FEED_AGENCY", default_value = "SF")]
        agency: String,

        /// Seconds to sleep between cycles
        #[arg(long, env = "FETCH_INTERVAL_SECS", default_value_t = 10)]
        interval_secs: u64,

        /// Seconds before a feed request is abandoned
        #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 60)]
        timeout_secs: u64,

        /// Warn once the history holds more records than this
        #[arg(long, env = "MAX_TOTAL_RECORDS", default_value_t = 1_000_000)]
        max_total_records: u64,

        /// Warn when a single batch holds more records than this
        #[arg(long, env = "MAX_BATCH_RECORDS", default_value_t = 100_000)]
        max_batch_records: u64,

        /// What to do when a ceiling is exceeded: signal or reject-batch
        #[arg(long, env = "OVERFLOW_POLICY", default_value = "signal")]
        overflow_policy: OverflowPolicy,

        /// Resolution for repeated vehicle ids: keep-first, keep-last or reject
        #[arg(long, env = "DUPLICATE_POLICY", default_value = "keep-first")]
        duplicate_policy: DuplicatePolicy,

        /// Number of cycles to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        cycles: usize,
    },
    /// Serve the live snapshot and history over HTTP
    Serve {
        #[command(flatten)]
        storage: StorageArgs,

        /// Address to listen on
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
    /// Decode a vehicle positions payload from a file or URL and log the records
    Decode {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Resolution for repeated vehicle ids: keep-first, keep-last or reject
        #[arg(long, default_value = "keep-first")]
        duplicate_policy: DuplicatePolicy,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_ingest.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_ingest.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            storage,
            feed_url,
            api_key,
            api_key_param,
            agency,
            interval_secs,
            timeout_secs,
            max_total_records,
            max_batch_records,
            overflow_policy,
            duplicate_policy,
            cycles,
        } => {
            let timeout = Duration::from_secs(timeout_secs);
            let client = UrlParam::new(
                UrlParam::new(BasicClient::with_timeout(timeout)?, "agency", agency),
                api_key_param,
                api_key,
            );
            let source = HttpFeedSource::new(client, feed_url);

            let history = SqliteHistoryStore::open(&storage.database).with_context(|| {
                format!("opening history store {}", storage.database.display())
            })?;
            let snapshot = SnapshotCache::new(storage.snapshot);

            let config = IngestConfig {
                fetch_interval: Duration::from_secs(interval_secs),
                fetch_timeout: timeout,
                guard: CapacityGuard::new(max_total_records, max_batch_records),
                overflow_policy,
                duplicate_policy,
                max_cycles: (cycles > 0).then_some(cycles),
            };
            info!(
                feed_url = source.url(),
                database = %storage.database.display(),
                snapshot = %snapshot.path().display(),
                "Starting ingester"
            );

            let mut scheduler = Scheduler::new(source, history, snapshot, config)?;
            scheduler.run().await;
        }
        Commands::Serve { storage, bind } => {
            let history = SqliteHistoryStore::open_reader(&storage.database).with_context(|| {
                format!("opening history store {}", storage.database.display())
            })?;
            let state = ApiState::new(SnapshotCache::new(storage.snapshot), history);
            api::serve(bind, state).await?;
        }
        Commands::Decode {
            source,
            duplicate_policy,
        } => {
            let bytes = fetcher(&source).await?;
            let decoded = decode(&bytes, duplicate_policy)?;
            info!(
                feed_timestamp = decoded.feed_timestamp,
                report = ?decoded.report,
                "Payload decoded"
            );
            info!("{}", serde_json::to_string_pretty(&decoded.records)?);
        }
    }

    Ok(())
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(fields(source = %url))]
async fn fetcher(url: &str) -> Result<Vec<u8>> {
    let bytes = if url.starts_with("http") {
        let client = BasicClient::with_timeout(config::DEFAULT_FETCH_TIMEOUT)?;
        fetch_bytes(&client, url).await?.to_vec()
    } else {
        std::fs::read(url)?
    };
    Ok(bytes)
}
