//! Snapshot naming and on-disc discovery.
//!
//! A snapshot's object key and local filename are the same string: the
//! capture timestamp in the configured timezone, formatted without spaces or
//! colons so it is safe as both an S3 key and a filename on every
//! filesystem. The `%Y-%m-%d` prefix is what the localizer's date-substring
//! match keys on, and the full stem parses back into a timestamp for window
//! selection.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, TimeZone};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const SNAPSHOT_EXTENSION: &str = "pb";

const STEM_FORMAT: &str = "%Y-%m-%d_%H.%M.%S%z";

/// Filename (and object key) for a snapshot captured at `ts`,
/// e.g. `2018-01-17_21.00.05-0500.pb`.
pub fn snapshot_file_name<Tz: TimeZone>(ts: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}.{}", ts.format(STEM_FORMAT), SNAPSHOT_EXTENSION)
}

/// Parses the capture timestamp out of a snapshot filename. Returns `None`
/// for names that are not snapshot files (wrong extension, foreign stem).
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<FixedOffset>> {
    let stem = name.strip_suffix(&format!(".{SNAPSHOT_EXTENSION}"))?;
    DateTime::parse_from_str(stem, STEM_FORMAT).ok()
}

/// Lists the snapshot files in `dir` captured strictly before `terminus`,
/// sorted by capture time.
///
/// Files whose names do not parse as snapshot timestamps are logged and
/// ignored; a missing directory is an error for the caller to interpret.
pub fn discover_candidates<Tz: TimeZone>(
    dir: &Path,
    terminus: &DateTime<Tz>,
) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list snapshot directory {}", dir.display()))?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        match parse_snapshot_name(name) {
            Some(captured_at) => {
                if captured_at.timestamp() < terminus.timestamp() {
                    candidates.push((captured_at, entry.path()));
                }
            }
            None => {
                warn!(dir = %dir.display(), name, "Ignoring file with unparseable snapshot name");
            }
        }
    }

    candidates.sort_by_key(|(captured_at, _)| *captured_at);
    Ok(candidates.into_iter().map(|(_, path)| path).collect())
}
