//! The localizer: mirrors one calendar day's archived snapshots for each
//! feed into a local directory tree, `<root>/<bucket>/<date>/`.
//!
//! Re-running a sync for an already-synced date is a no-op: directories are
//! created idempotently and objects already present locally are not
//! re-downloaded.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::Path;
use tracing::{error, info};

use crate::config::FeedConfig;
use crate::outcome::RunOutcome;
use crate::snapshots::SNAPSHOT_EXTENSION;

/// Synchronizes `date`'s snapshots for every configured feed. Per-feed
/// failures are contained.
pub async fn localize_date(
    s3: &aws_sdk_s3::Client,
    config: &FeedConfig,
    date: NaiveDate,
    root: &Path,
    dryrun: bool,
) -> Vec<(u32, RunOutcome)> {
    let date_str = date.format("%Y-%m-%d").to_string();

    let mut outcomes = Vec::new();
    for &feed_id in &config.feeds {
        let outcome = match localize_feed(s3, config, feed_id, &date_str, root, dryrun).await {
            Ok(()) => RunOutcome::Success,
            Err(e) => {
                error!(feed_id, error = %format!("{e:#}"), "Feed sync failed");
                RunOutcome::Fatal {
                    reason: format!("{e:#}"),
                }
            }
        };
        outcomes.push((feed_id, outcome));
    }

    outcomes
}

async fn localize_feed(
    s3: &aws_sdk_s3::Client,
    config: &FeedConfig,
    feed_id: u32,
    date_str: &str,
    root: &Path,
    dryrun: bool,
) -> Result<()> {
    let bucket = config.bucket(feed_id);
    let target_dir = root.join(&bucket).join(date_str);
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("failed to create {}", target_dir.display()))?;

    let mut downloaded = 0usize;
    let mut present = 0usize;
    let mut planned = 0usize;

    let mut pages = s3.list_objects_v2().bucket(&bucket).into_paginator().send();
    while let Some(page) = pages.next().await {
        let page = page.with_context(|| format!("failed to list bucket {bucket}"))?;
        for object in page.contents() {
            let Some(key) = object.key() else { continue };
            if !key.contains(date_str) {
                continue;
            }

            let target = target_dir.join(key);
            if target.exists() {
                present += 1;
                continue;
            }

            if dryrun {
                info!(%bucket, key, "(dryrun) would download");
                planned += 1;
                continue;
            }

            let resp = s3
                .get_object()
                .bucket(&bucket)
                .key(key)
                .send()
                .await
                .with_context(|| format!("failed to fetch s3://{bucket}/{key}"))?;
            let bytes = resp
                .body
                .collect()
                .await
                .with_context(|| format!("failed to read body of s3://{bucket}/{key}"))?
                .into_bytes();
            std::fs::write(&target, &bytes)
                .with_context(|| format!("failed to write {}", target.display()))?;
            downloaded += 1;
        }
    }

    let swept = if dryrun {
        0
    } else {
        sweep_flat_snapshots(root, &target_dir)?
    };

    info!(
        feed_id,
        %bucket, downloaded, present, planned, swept, dryrun, "Feed sync finished"
    );
    Ok(())
}

/// Moves any snapshot file sitting flat in `root` into `target_dir`. Sync
/// tooling that writes to the working directory drops files there; this
/// sweep restores the nested layout.
pub fn sweep_flat_snapshots(root: &Path, target_dir: &Path) -> Result<usize> {
    let mut moved = 0;

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
            continue;
        }

        let dest = target_dir.join(entry.file_name());
        std::fs::rename(&path, &dest)
            .with_context(|| format!("failed to move {} into place", path.display()))?;
        moved += 1;
    }

    Ok(moved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_sweep_moves_only_snapshot_files() {
        let root = scratch_dir("gtfs_rt_archiver_test_sweep");
        let target = root.join("mta-gtfs-1").join("2018-01-18");
        fs::create_dir_all(&target).unwrap();

        fs::write(root.join("2018-01-18_09.00.00-0500.pb"), b"snap").unwrap();
        fs::write(root.join("notes.txt"), b"keep me").unwrap();

        let moved = sweep_flat_snapshots(&root, &target).unwrap();
        assert_eq!(moved, 1);
        assert!(target.join("2018-01-18_09.00.00-0500.pb").exists());
        assert!(root.join("notes.txt").exists());
        assert!(!root.join("2018-01-18_09.00.00-0500.pb").exists());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let root = scratch_dir("gtfs_rt_archiver_test_sweep_twice");
        let target = root.join("mta-gtfs-1").join("2018-01-18");
        fs::create_dir_all(&target).unwrap();
        fs::write(root.join("2018-01-18_09.00.00-0500.pb"), b"snap").unwrap();

        assert_eq!(sweep_flat_snapshots(&root, &target).unwrap(), 1);
        assert_eq!(sweep_flat_snapshots(&root, &target).unwrap(), 0);

        fs::remove_dir_all(&root).unwrap();
    }
}
