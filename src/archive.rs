//! The archiver: fetches one current snapshot per configured feed and
//! writes the raw bytes to that feed's bucket, keyed by capture time.

use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::fetch::{HttpClient, fetch_response};
use crate::outcome::RunOutcome;
use crate::snapshots::snapshot_file_name;

/// Body the endpoint serves in place of feed bytes while its own
/// (non-atomic) upstream write is in progress.
const DENIED_SENTINEL: &[u8] = b"Permission denied";

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Archives every configured feed once. The access key is expected to be
/// baked into `http` (see [`crate::fetch::UrlParam`]); per-feed failures are
/// contained.
pub async fn archive_feeds<C: HttpClient>(
    http: &C,
    s3: &aws_sdk_s3::Client,
    config: &FeedConfig,
) -> Vec<(u32, RunOutcome)> {
    // One capture timestamp per invocation: all feeds archived in the same
    // run share an object key.
    let captured_at = Utc::now().with_timezone(&config.timezone);
    let key = snapshot_file_name(&captured_at);

    let mut outcomes = Vec::new();
    for &feed_id in &config.feeds {
        let outcome = archive_feed(http, s3, config, feed_id, &key).await;
        match &outcome {
            RunOutcome::Fatal { reason } => {
                error!(feed_id, %reason, "Failed to archive feed")
            }
            _ => info!(feed_id, key, "Archived snapshot"),
        }
        outcomes.push((feed_id, outcome));
    }

    outcomes
}

async fn archive_feed<C: HttpClient>(
    http: &C,
    s3: &aws_sdk_s3::Client,
    config: &FeedConfig,
    feed_id: u32,
    key: &str,
) -> RunOutcome {
    let url = format!("{}?feed_id={}", config.endpoint, feed_id);

    let body = match fetch_with_retry(http, &url).await {
        Ok(body) => body,
        Err(reason) => return RunOutcome::Fatal { reason },
    };

    let put = s3
        .put_object()
        .bucket(config.bucket(feed_id))
        .key(key)
        .body(ByteStream::from(body))
        .send()
        .await;

    match put {
        Ok(_) => RunOutcome::Success,
        Err(e) => RunOutcome::Fatal {
            reason: format!("S3 put failed: {e}"),
        },
    }
}

/// One fetch attempt, retried exactly once after a short fixed delay. No
/// backoff growth.
async fn fetch_with_retry<C: HttpClient>(http: &C, url: &str) -> Result<Bytes, String> {
    match attempt(http, url).await {
        Ok(body) => return Ok(body),
        Err(reason) => {
            warn!(url, %reason, "Snapshot fetch failed; retrying once");
        }
    }

    tokio::time::sleep(RETRY_DELAY).await;
    attempt(http, url).await
}

async fn attempt<C: HttpClient>(http: &C, url: &str) -> Result<Bytes, String> {
    match fetch_response(http, url).await {
        Ok((status, body)) => check_snapshot_response(status, body),
        Err(e) => Err(format!("fetch failed: {e}")),
    }
}

/// Separates real snapshot bytes from the endpoint's failure modes: the
/// permission-denied sentinel body, a 404, or any other non-success status.
fn check_snapshot_response(status: StatusCode, body: Bytes) -> Result<Bytes, String> {
    if status == StatusCode::NOT_FOUND {
        return Err("endpoint returned 404".to_string());
    }
    if body == DENIED_SENTINEL {
        return Err("endpoint returned the permission-denied sentinel".to_string());
    }
    if !status.is_success() {
        return Err(format!("endpoint returned status {status}"));
    }
    Ok(body)
}
