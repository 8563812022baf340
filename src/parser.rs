//! Protobuf decoding for archived GTFS Realtime snapshots.

use anyhow::Result;
use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn parse_feed(bytes: &[u8]) -> Result<FeedMessage> {
    Ok(FeedMessage::decode(bytes)?)
}

/// The result of decoding one archived snapshot.
///
/// Corrupt or inconsistent snapshots are routine in a long-running archive, so
/// decode failure is a value, not an error: the compiler counts and logs
/// skipped snapshots and keeps going.
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded(FeedMessage),
    Skipped { reason: String },
}

impl DecodeOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, DecodeOutcome::Skipped { .. })
    }
}

/// Decodes one snapshot, folding both protobuf failures and consistency
/// problems into [`DecodeOutcome::Skipped`].
///
/// A snapshot whose header carries no generation timestamp cannot be placed
/// on the observation timeline, so it is treated the same as a corrupt one.
pub fn decode_snapshot(bytes: &[u8]) -> DecodeOutcome {
    let feed = match FeedMessage::decode(bytes) {
        Ok(feed) => feed,
        Err(e) => {
            return DecodeOutcome::Skipped {
                reason: format!("protobuf decode failed: {e}"),
            };
        }
    };

    if feed.header.timestamp.is_none() {
        return DecodeOutcome::Skipped {
            reason: "header has no generation timestamp".to_string(),
        };
    }

    DecodeOutcome::Decoded(feed)
}
