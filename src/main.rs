//! CLI entry point for the GTFS-RT archive toolchain.
//!
//! Provides subcommands for archiving realtime snapshots to S3, mirroring a
//! day's archive locally, compiling trip logbooks into SQLite, and loading a
//! static bundle's stop table.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use gtfs_rt_archiver::archive::archive_feeds;
use gtfs_rt_archiver::config::FeedConfig;
use gtfs_rt_archiver::db;
use gtfs_rt_archiver::fetch::{BasicClient, UrlParam};
use gtfs_rt_archiver::localize::localize_date;
use gtfs_rt_archiver::logbook::compile::{CompileOptions, compile_all};
use gtfs_rt_archiver::outcome::{RunOutcome, all_fatal};
use gtfs_rt_archiver::stops::{RouteStrategy, StopsOptions, compile_stops};

#[derive(Parser)]
#[command(name = "gtfs_rt_archiver")]
#[command(about = "Archive GTFS-RT snapshots and compile trip logbooks", long_about = None)]
struct Cli {
    /// JSON config file overriding the built-in feed set and defaults
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a snapshot of every configured feed and archive it to S3
    Archive,
    /// Mirror one day's archived snapshots into a local directory tree
    Localize {
        /// Calendar date to sync, e.g. "2018-01-17"
        #[arg(value_name = "DATE")]
        date: String,

        /// Root of the local snapshot tree
        #[arg(value_name = "OUT_DIR")]
        out: PathBuf,

        /// Plan the sync without transferring any data
        #[arg(long)]
        dryrun: bool,
    },
    /// Compile a time window's snapshots into the Logbooks table
    CompileLogbooks {
        /// Root of the local snapshot tree
        root: PathBuf,

        /// Window start in %Y-%m-%dT%H:%M, e.g. "2018-01-18T00:00"
        start_time: String,

        /// Window end in %Y-%m-%dT%H:%M
        end_time: String,

        /// SQLite database to append to
        db: PathBuf,

        /// Compile even when the day-after lookahead directory is missing;
        /// trips crossing the window end are then dropped as partial
        #[arg(long)]
        allow_missing_lookahead: bool,
    },
    /// Append a GTFS bundle's stop table with authority window and dominant routes
    CompileStops {
        /// Path or URL of the zipped GTFS bundle
        gtfs: String,

        /// Start of the bundle's authority window, %Y-%m-%dT%H:%M
        authority_start_time: String,

        /// End of the bundle's authority window, %Y-%m-%dT%H:%M
        authority_end_time: String,

        /// SQLite database to append to
        db: PathBuf,

        /// How to pick each stop's dominant route from logbook history
        #[arg(long, value_enum, default_value = "thresholded")]
        route_strategy: RouteStrategyArg,

        /// Minimum (route, stop) observation count for the thresholded strategy
        #[arg(long, default_value_t = 10)]
        route_threshold: i64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RouteStrategyArg {
    MostFrequent,
    Thresholded,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_rt_archiver.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_rt_archiver.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => FeedConfig::load(path)?,
        None => FeedConfig::default(),
    };

    match cli.command {
        Commands::Archive => {
            let key = std::env::var("MTA_API_KEY").context("MTA_API_KEY must be set")?;
            let http = UrlParam {
                inner: BasicClient::new()?,
                param_name: "key".to_string(),
                key,
            };

            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);

            let outcomes = archive_feeds(&http, &s3, &config).await;
            summarize("archive", &outcomes)?;
        }
        Commands::Localize { date, out, dryrun } => {
            let date = parse_date(&date)?;

            let aws = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&aws);

            let outcomes = localize_date(&s3, &config, date, &out, dryrun).await;
            summarize("localize", &outcomes)?;
        }
        Commands::CompileLogbooks {
            root,
            start_time,
            end_time,
            db: db_path,
            allow_missing_lookahead,
        } => {
            let start = parse_local_datetime(&start_time, config.timezone)?;
            let end = parse_local_datetime(&end_time, config.timezone)?;
            anyhow::ensure!(start < end, "window start must precede window end");

            let pool = db::open(&db_path).await?;
            let opts = CompileOptions {
                start,
                end,
                allow_missing_lookahead,
            };
            let outcomes = compile_all(&pool, &root, &config, &opts).await;
            pool.close().await;

            summarize("compile-logbooks", &outcomes)?;
        }
        Commands::CompileStops {
            gtfs,
            authority_start_time,
            authority_end_time,
            db: db_path,
            route_strategy,
            route_threshold,
        } => {
            let authority_start = parse_local_datetime(&authority_start_time, config.timezone)?;
            let authority_end = parse_local_datetime(&authority_end_time, config.timezone)?;
            anyhow::ensure!(
                authority_start < authority_end,
                "authority window start must precede its end"
            );

            let strategy = match route_strategy {
                RouteStrategyArg::MostFrequent => RouteStrategy::MostFrequent,
                RouteStrategyArg::Thresholded => RouteStrategy::Thresholded {
                    min_count: route_threshold,
                },
            };

            let pool = db::open(&db_path).await?;
            let http = BasicClient::new()?;
            let written = compile_stops(
                &pool,
                &http,
                &gtfs,
                &StopsOptions {
                    authority_start,
                    authority_end,
                    strategy,
                },
            )
            .await?;
            pool.close().await;

            info!(written, "Stops compile finished");
        }
    }

    Ok(())
}

/// Parses a `%Y-%m-%dT%H:%M` wall-clock time in the configured timezone.
fn parse_local_datetime(value: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .with_context(|| format!("'{value}' is not a %Y-%m-%dT%H:%M datetime"))?;
    tz.from_local_datetime(&naive)
        .single()
        .with_context(|| format!("'{value}' is ambiguous or nonexistent in {tz}"))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("'{value}' is not a %Y-%m-%d date"))
}

/// Logs per-feed outcomes and fails the process only when no feed got
/// anywhere at all.
fn summarize(command: &str, outcomes: &[(u32, RunOutcome)]) -> Result<()> {
    for (feed_id, outcome) in outcomes {
        info!(feed_id, outcome = %outcome, "Feed outcome");
    }
    if all_fatal(outcomes) {
        anyhow::bail!("{command}: every feed failed");
    }
    Ok(())
}
