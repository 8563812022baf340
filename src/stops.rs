//! The stops compiler: extracts the stop reference table from a static GTFS
//! bundle, stamps it with an authority window, attaches a dominant route
//! derived from historical logbook data, and appends it to the `Stops`
//! table.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::info;

use crate::db::{self, StopRow};
use crate::fetch::{HttpClient, fetch_bytes};

/// A row of `stops.txt`. Bundles carry many more columns; only these are
/// persisted.
#[derive(Debug, Deserialize)]
pub struct RawStop {
    pub stop_id: String,
    #[serde(default)]
    pub stop_name: Option<String>,
    #[serde(default)]
    pub stop_lat: Option<f64>,
    #[serde(default)]
    pub stop_lon: Option<f64>,
}

/// How the dominant route for a stop is chosen from historical
/// `(route, stop)` observation counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStrategy {
    /// The most frequently observed route, full stop.
    MostFrequent,
    /// The most frequently observed route among pairs seen at least
    /// `min_count` times; stops with no pair over the threshold get none.
    Thresholded { min_count: i64 },
}

#[derive(Debug, Clone)]
pub struct StopsOptions {
    pub authority_start: DateTime<Tz>,
    pub authority_end: DateTime<Tz>,
    pub strategy: RouteStrategy,
}

/// Loads the bundle bytes from a local path or over HTTP.
pub async fn load_bundle<C: HttpClient>(http: &C, source: &str) -> Result<Bytes> {
    if Path::new(source).exists() {
        let bytes = std::fs::read(source)
            .with_context(|| format!("failed to read bundle {source}"))?;
        return Ok(bytes.into());
    }
    if source.starts_with("http") {
        return fetch_bytes(http, source).await;
    }
    anyhow::bail!("bundle '{source}' is neither an existing file nor a URL")
}

/// Extracts and parses `stops.txt` from a zipped GTFS bundle.
pub fn read_stops(bundle: &[u8]) -> Result<Vec<RawStop>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bundle)).context("bundle is not a zip archive")?;
    let mut file = archive
        .by_name("stops.txt")
        .context("bundle has no stops.txt")?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let mut stops = Vec::new();
    for result in reader.deserialize() {
        let stop: RawStop = result.context("malformed stops.txt row")?;
        stops.push(stop);
    }
    Ok(stops)
}

/// Stop identifiers ending in a digit name parent stations rather than the
/// directional platforms the logbooks reference; they are excluded.
pub fn ends_in_digit(stop_id: &str) -> bool {
    stop_id.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Picks each stop's dominant route from `(stop_id, route_id, count)`
/// observation counts. Ties break toward the lexicographically smaller
/// route id so the result is stable.
pub fn dominant_routes(
    counts: &[(String, String, i64)],
    strategy: RouteStrategy,
) -> HashMap<String, String> {
    let mut best: HashMap<String, (String, i64)> = HashMap::new();

    for (stop_id, route_id, count) in counts {
        if let RouteStrategy::Thresholded { min_count } = strategy {
            if *count < min_count {
                continue;
            }
        }

        let replace = match best.get(stop_id) {
            None => true,
            Some((current_route, current_count)) => {
                count > current_count || (count == current_count && route_id < current_route)
            }
        };
        if replace {
            best.insert(stop_id.clone(), (route_id.clone(), *count));
        }
    }

    best.into_iter()
        .map(|(stop_id, (route_id, _))| (stop_id, route_id))
        .collect()
}

/// Runs the full stops pipeline and appends the rows in one transaction.
pub async fn compile_stops<C: HttpClient>(
    pool: &SqlitePool,
    http: &C,
    source: &str,
    opts: &StopsOptions,
) -> Result<usize> {
    anyhow::ensure!(
        opts.authority_start < opts.authority_end,
        "authority window start must precede its end"
    );

    let bundle = load_bundle(http, source).await?;
    let raw = read_stops(&bundle)?;
    let total = raw.len();

    let counts = db::route_counts(pool).await?;
    let dominant = dominant_routes(&counts, opts.strategy);

    let start_ts = opts.authority_start.timestamp();
    let end_ts = opts.authority_end.timestamp();

    let rows: Vec<StopRow> = raw
        .into_iter()
        .filter(|stop| !ends_in_digit(&stop.stop_id))
        .enumerate()
        .map(|(position, stop)| StopRow {
            dominant_route: dominant.get(&stop.stop_id).cloned(),
            stop_id: stop.stop_id,
            stop_name: stop.stop_name,
            stop_lat: stop.stop_lat,
            stop_lon: stop.stop_lon,
            authority_start_time: start_ts,
            authority_end_time: end_ts,
            authority_id: position as i64,
        })
        .collect();

    let written = db::append_stops(pool, &rows).await?;
    info!(
        source,
        total,
        written,
        filtered = total - written,
        "Appended stop rows"
    );
    Ok(written)
}
