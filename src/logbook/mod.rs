//! Trip logbooks: reconciling an ordered stream of decoded snapshots into
//! per-trip stop-event logs, trimming them down to complete single-day
//! trips, and writing the survivors to the relational store.

pub mod compile;
pub mod reconcile;
pub mod trim;

use std::collections::BTreeMap;

/// What happened (or is expected to happen) at a stop, as far as the feed
/// let us resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// The vehicle was observed stopped at the stop.
    StoppedAt,
    /// The stop left the trip's pending list between two observations with
    /// no direct confirmation either way.
    StoppedOrSkipped,
    /// The stop was still pending when the trip left the feed.
    EnRouteTo,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::StoppedAt => "STOPPED_AT",
            Action::StoppedOrSkipped => "STOPPED_OR_SKIPPED",
            Action::EnRouteTo => "EN_ROUTE_TO",
        }
    }

    /// Whether this action represents a resolved visit rather than an
    /// expectation. Only confirmed events count toward trip completeness.
    pub fn is_confirmed(self) -> bool {
        matches!(self, Action::StoppedAt | Action::StoppedOrSkipped)
    }
}

/// One row of a trip's log, matching the `Logbooks` table shape.
#[derive(Debug, Clone, PartialEq)]
pub struct StopEvent {
    pub trip_id: String,
    pub unique_trip_id: String,
    pub route_id: String,
    pub action: Action,
    /// Earliest time the event can have happened (observation bound), unix
    /// seconds. `None` when the lower bound is unknown (trip first seen).
    pub minimum_time: Option<i64>,
    /// Latest time the event can have happened. `None` when the trip left
    /// the feed before the event resolved.
    pub maximum_time: Option<i64>,
    pub stop_id: String,
    /// Generation timestamp of the snapshot this event was derived from.
    pub latest_information_time: i64,
}

/// A reconciled logbook: unique trip identifier to its ordered event log.
pub type Logbook = BTreeMap<String, Vec<StopEvent>>;
