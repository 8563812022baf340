//! Reconciliation of a snapshot stream into per-trip event logs.
//!
//! Each snapshot carries, per trip, the ordered list of stops the trip has
//! yet to make plus (sometimes) a vehicle position confirming where the
//! vehicle actually is. Diffing the pending stop list between consecutive
//! observations of the same trip tells us which stops were resolved in
//! between, bracketed by the two generation timestamps. A trip that leaves
//! the feed with stops still pending was either completed at its head stop
//! or cancelled; the trailing unconfirmed event it leaves behind is resolved
//! downstream by cancellation trimming.

use std::collections::HashMap;

use crate::gtfs_rt::FeedMessage;
use crate::gtfs_rt::vehicle_position::VehicleStopStatus;

use super::{Action, Logbook, StopEvent};

/// One trip's appearance in one snapshot.
struct Observation {
    route_id: String,
    pending: Vec<String>,
    stopped_at: Option<String>,
}

/// Accumulated state for a trip currently present in the feed.
struct TripState {
    trip_id: String,
    unique_trip_id: String,
    route_id: String,
    pending: Vec<String>,
    /// Generation time of the last snapshot this trip appeared in.
    last_seen: i64,
    /// A vehicle position confirmed the vehicle stopped at the current
    /// pending head. Sticky until the head resolves.
    confirmed_at_head: bool,
    events: Vec<StopEvent>,
}

impl TripState {
    fn new(trip_id: &str, obs: Observation, ts: i64) -> Self {
        let confirmed_at_head = confirmed(&obs);
        TripState {
            trip_id: trip_id.to_string(),
            unique_trip_id: format!("{trip_id}_{ts}"),
            route_id: obs.route_id,
            pending: obs.pending,
            last_seen: ts,
            confirmed_at_head,
            events: Vec::new(),
        }
    }

    fn push_event(
        &mut self,
        stop_id: String,
        action: Action,
        minimum_time: Option<i64>,
        maximum_time: Option<i64>,
        information_time: i64,
    ) {
        self.events.push(StopEvent {
            trip_id: self.trip_id.clone(),
            unique_trip_id: self.unique_trip_id.clone(),
            route_id: self.route_id.clone(),
            action,
            minimum_time,
            maximum_time,
            stop_id,
            latest_information_time: information_time,
        });
    }

    /// Folds the next observation of this trip into the log.
    fn advance(&mut self, obs: Observation, ts: i64) {
        if let Some(new_head) = obs.pending.first() {
            if let Some(idx) = self.pending.iter().position(|s| s == new_head) {
                // Everything ahead of the new head was resolved between the
                // two observations.
                let resolved: Vec<String> = self.pending.drain(..idx).collect();
                for (i, stop_id) in resolved.into_iter().enumerate() {
                    let action = if i == 0 && self.confirmed_at_head {
                        Action::StoppedAt
                    } else {
                        Action::StoppedOrSkipped
                    };
                    self.push_event(stop_id, action, Some(self.last_seen), Some(ts), ts);
                    self.confirmed_at_head = false;
                }
            } else {
                // The pending list was rewritten upstream; nothing can be
                // resolved from the diff.
                self.confirmed_at_head = false;
            }
        }

        let head_unchanged = self.pending.first() == obs.pending.first();
        if !obs.route_id.is_empty() {
            self.route_id = obs.route_id.clone();
        }
        let now_confirmed = confirmed(&obs);
        self.pending = obs.pending;
        self.confirmed_at_head = (head_unchanged && self.confirmed_at_head) || now_confirmed;
        self.last_seen = ts;
    }

    /// Called when the trip leaves the feed (or the stream ends) at `ts`.
    fn finalize(&mut self, ts: i64) {
        let Some(head) = self.pending.first().cloned() else {
            return;
        };
        if self.confirmed_at_head {
            self.push_event(
                head,
                Action::StoppedAt,
                Some(self.last_seen),
                Some(ts),
                self.last_seen,
            );
        } else {
            self.push_event(
                head,
                Action::EnRouteTo,
                Some(self.last_seen),
                None,
                self.last_seen,
            );
        }
    }
}

fn confirmed(obs: &Observation) -> bool {
    match (&obs.stopped_at, obs.pending.first()) {
        (Some(at), Some(head)) => at == head,
        _ => false,
    }
}

/// Extracts per-trip observations from one snapshot.
fn observations(feed: &FeedMessage) -> HashMap<String, Observation> {
    let mut by_trip: HashMap<String, Observation> = HashMap::new();

    for entity in &feed.entity {
        if let Some(tu) = &entity.trip_update {
            let Some(trip_id) = tu.trip.trip_id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };
            let pending = tu
                .stop_time_update
                .iter()
                .filter_map(|stu| stu.stop_id.clone())
                .collect();
            let obs = by_trip.entry(trip_id).or_insert_with(|| Observation {
                route_id: String::new(),
                pending: Vec::new(),
                stopped_at: None,
            });
            obs.pending = pending;
            if let Some(route_id) = &tu.trip.route_id {
                obs.route_id = route_id.clone();
            }
        }

        if let Some(vp) = &entity.vehicle {
            let Some(trip_id) = vp
                .trip
                .as_ref()
                .and_then(|t| t.trip_id.clone())
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            if vp.current_status() == VehicleStopStatus::StoppedAt {
                let obs = by_trip.entry(trip_id).or_insert_with(|| Observation {
                    route_id: String::new(),
                    pending: Vec::new(),
                    stopped_at: None,
                });
                obs.stopped_at = vp.stop_id.clone();
            }
        }
    }

    by_trip
}

/// Reconciles a sequence of decoded snapshots into a [`Logbook`].
///
/// Snapshots are processed in generation-timestamp order regardless of input
/// order. Trip-id reuse after a gap starts a fresh log under a new unique
/// trip identifier.
pub fn build_logbook(feeds: &[FeedMessage]) -> Logbook {
    let mut ordered: Vec<&FeedMessage> = feeds
        .iter()
        .filter(|f| f.header.timestamp.is_some())
        .collect();
    ordered.sort_by_key(|f| f.header.timestamp);

    let mut active: HashMap<String, TripState> = HashMap::new();
    let mut retired: Vec<TripState> = Vec::new();
    let mut last_ts = 0i64;

    for feed in ordered {
        let ts = feed.header.timestamp.unwrap_or_default() as i64;
        last_ts = ts;
        let mut observed = observations(feed);

        // Trips gone from this snapshot are closed out.
        let departed: Vec<String> = active
            .keys()
            .filter(|trip_id| !observed.contains_key(*trip_id))
            .cloned()
            .collect();
        for trip_id in departed {
            if let Some(mut state) = active.remove(&trip_id) {
                state.finalize(ts);
                retired.push(state);
            }
        }

        for (trip_id, obs) in observed.drain() {
            match active.get_mut(&trip_id) {
                Some(state) => state.advance(obs, ts),
                None => {
                    active.insert(trip_id.clone(), TripState::new(&trip_id, obs, ts));
                }
            }
        }
    }

    // The stream ended; whatever is still active ends with it.
    for (_, mut state) in active.drain() {
        state.finalize(last_ts);
        retired.push(state);
    }

    retired
        .into_iter()
        .map(|state| (state.unique_trip_id, state.events))
        .collect()
}
