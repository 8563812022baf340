//! The per-feed compile pipeline: discover candidate snapshots for a time
//! window (plus lookahead), decode them, reconcile, trim, and append the
//! surviving rows to the `Logbooks` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::db;
use crate::outcome::RunOutcome;
use crate::parser::{DecodeOutcome, decode_snapshot};
use crate::snapshots::discover_candidates;

use super::StopEvent;
use super::trim::window_trim;
use super::reconcile::build_logbook;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    /// Proceed without a day-after directory instead of failing the feed.
    /// Trips that cross the window end will be lost as partial.
    pub allow_missing_lookahead: bool,
}

/// Compiles every configured feed, containing fatal errors per feed.
pub async fn compile_all(
    pool: &SqlitePool,
    root: &Path,
    config: &FeedConfig,
    opts: &CompileOptions,
) -> Vec<(u32, RunOutcome)> {
    let mut outcomes = Vec::new();

    for &feed_id in &config.feeds {
        let outcome = match compile_feed(pool, root, config, opts, feed_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(feed_id, error = %format!("{e:#}"), "Feed compile failed");
                RunOutcome::Fatal {
                    reason: format!("{e:#}"),
                }
            }
        };
        info!(feed_id, outcome = %outcome, "Feed compile finished");
        outcomes.push((feed_id, outcome));
    }

    outcomes
}

/// Runs the full pipeline for one feed and appends its rows.
pub async fn compile_feed(
    pool: &SqlitePool,
    root: &Path,
    config: &FeedConfig,
    opts: &CompileOptions,
    feed_id: u32,
) -> Result<RunOutcome> {
    let feed_root = root.join(config.bucket(feed_id));
    let day_of = opts.start.date_naive();
    let day_after = day_of
        .succ_opt()
        .context("window start has no following day")?;
    let terminus = opts.end + Duration::hours(config.lookahead_hours);

    let day_of_dir = feed_root.join(day_of.format("%Y-%m-%d").to_string());
    let day_after_dir = feed_root.join(day_after.format("%Y-%m-%d").to_string());

    let mut candidates = discover_candidates(&day_of_dir, &terminus)?;

    // Trips still running at the window end only close out in day-after
    // snapshots, so that directory is required unless the operator opts out.
    match discover_candidates(&day_after_dir, &terminus) {
        Ok(mut lookahead) => candidates.append(&mut lookahead),
        Err(e) => {
            if opts.allow_missing_lookahead {
                warn!(
                    feed_id,
                    dir = %day_after_dir.display(),
                    "Day-after directory unavailable; trips crossing the window end will be dropped as partial"
                );
            } else {
                return Err(e).context(
                    "day-after snapshots are required to close out trips that cross the \
                     window end (pass --allow-missing-lookahead to compile without them)",
                );
            }
        }
    }

    let (feeds, skipped) = decode_candidates(&candidates);

    let mut logbook = build_logbook(&feeds);
    let reconciled = logbook.len();
    window_trim(&mut logbook, &opts.start, &opts.end, config);
    let complete = logbook.len();

    let rows: Vec<StopEvent> = logbook.into_values().flatten().collect();
    let written = db::append_logbook(pool, &rows).await?;

    info!(
        feed_id,
        candidates = candidates.len(),
        skipped,
        reconciled,
        complete,
        rows = written,
        "Appended logbook rows"
    );

    Ok(RunOutcome::from_skipped(skipped))
}

/// Decodes each candidate file, counting rather than propagating failures.
fn decode_candidates(candidates: &[PathBuf]) -> (Vec<crate::gtfs_rt::FeedMessage>, usize) {
    let mut feeds = Vec::with_capacity(candidates.len());
    let mut skipped = 0;

    for path in candidates {
        let outcome = match std::fs::read(path) {
            Ok(bytes) => decode_snapshot(&bytes),
            Err(e) => DecodeOutcome::Skipped {
                reason: format!("read failed: {e}"),
            },
        };
        match outcome {
            DecodeOutcome::Decoded(feed) => feeds.push(feed),
            DecodeOutcome::Skipped { reason } => {
                skipped += 1;
                warn!(file = %path.display(), %reason, "Skipping snapshot");
            }
        }
    }

    (feeds, skipped)
}
