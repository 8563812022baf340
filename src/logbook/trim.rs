//! Trimming rules that turn a raw reconciled logbook into the set of
//! complete trips that started inside the requested window.

use chrono::DateTime;
use chrono_tz::Tz;

use crate::config::FeedConfig;

use super::{Logbook, StopEvent};

/// Drops the trailing run of unconfirmed events from a trip's log.
///
/// A trip that was cancelled (or fell off the feed) leaves expectation
/// records after its last real stop; everything after the last confirmed
/// event is that cancellation tail.
pub fn cut_cancellations(events: &mut Vec<StopEvent>) {
    let last_confirmed = events.iter().rposition(|e| e.action.is_confirmed());
    match last_confirmed {
        Some(idx) => events.truncate(idx + 1),
        None => events.clear(),
    }
}

/// A log too thin to stand on its own: fewer than two events, or no
/// confirmed stop anywhere (the trip never demonstrably went somewhere).
pub fn is_partial(events: &[StopEvent]) -> bool {
    events.len() < 2 || !events.iter().any(|e| e.action.is_confirmed())
}

/// Whether the event's as-of timestamp lies in `[start, end)` and on the
/// same calendar day as the window start. The day check matters for windows
/// that cross midnight; the window check removes trips that started after
/// the nominal end and were only read in for lookahead.
///
/// The as-of time is the event's lower observation bound: the trip started
/// when its first stop was first seen pending, not when a later snapshot
/// resolved it.
fn starts_in_window(event: &StopEvent, start: &DateTime<Tz>, end: &DateTime<Tz>) -> bool {
    let ts = event.minimum_time.unwrap_or(event.latest_information_time);
    if ts < start.timestamp() || ts >= end.timestamp() {
        return false;
    }
    match DateTime::from_timestamp(ts, 0) {
        Some(as_of) => as_of.with_timezone(&start.timezone()).date_naive() == start.date_naive(),
        None => false,
    }
}

/// Crops a logbook down to complete trips that started inside the window:
///
/// 1. cancellation trimming per trip, except for exception routes;
/// 2. partial trips dropped;
/// 3. trips whose first surviving event is outside `[start, end)` (or off
///    the window start's calendar day) dropped — these were only read in
///    for lookahead.
pub fn window_trim(
    logbook: &mut Logbook,
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
    config: &FeedConfig,
) {
    for events in logbook.values_mut() {
        let exempt = events
            .first()
            .is_some_and(|e| config.is_exception_route(&e.route_id));
        if !exempt {
            cut_cancellations(events);
        }
    }

    logbook.retain(|_, events| {
        if is_partial(events) {
            return false;
        }
        events
            .first()
            .is_some_and(|first| starts_in_window(first, start, end))
    });
}
