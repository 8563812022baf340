//! End-to-end compile pipeline tests over synthetic snapshot trees.

use chrono::TimeZone;
use chrono_tz::America::New_York;
use prost::Message;
use std::fs;
use std::path::{Path, PathBuf};

use gtfs_rt_archiver::config::FeedConfig;
use gtfs_rt_archiver::db;
use gtfs_rt_archiver::gtfs_rt::trip_update::StopTimeUpdate;
use gtfs_rt_archiver::gtfs_rt::vehicle_position::VehicleStopStatus;
use gtfs_rt_archiver::gtfs_rt::{
    FeedEntity, FeedHeader, FeedMessage, TripDescriptor, TripUpdate, VehiclePosition,
};
use gtfs_rt_archiver::logbook::compile::{CompileOptions, compile_all, compile_feed};
use gtfs_rt_archiver::outcome::RunOutcome;
use gtfs_rt_archiver::snapshots::snapshot_file_name;

type NyTime = chrono::DateTime<chrono_tz::Tz>;

fn ny(day: u32, hour: u32, minute: u32) -> NyTime {
    New_York
        .with_ymd_and_hms(2018, 1, day, hour, minute, 0)
        .unwrap()
}

fn trip_update(trip_id: &str, route_id: &str, stops: &[&str]) -> FeedEntity {
    FeedEntity {
        id: format!("tu-{trip_id}"),
        trip_update: Some(TripUpdate {
            trip: TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                route_id: Some(route_id.to_string()),
                ..Default::default()
            },
            stop_time_update: stops
                .iter()
                .map(|s| StopTimeUpdate {
                    stop_id: Some(s.to_string()),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn stopped_at(trip_id: &str, stop_id: &str) -> FeedEntity {
    FeedEntity {
        id: format!("vp-{trip_id}"),
        vehicle: Some(VehiclePosition {
            trip: Some(TripDescriptor {
                trip_id: Some(trip_id.to_string()),
                ..Default::default()
            }),
            stop_id: Some(stop_id.to_string()),
            current_status: Some(VehicleStopStatus::StoppedAt as i32),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn write_snapshot(dir: &Path, at: &NyTime, entities: Vec<FeedEntity>) {
    let message = FeedMessage {
        header: FeedHeader {
            gtfs_realtime_version: "1.0".to_string(),
            timestamp: Some(at.timestamp() as u64),
            incrementality: None,
            feed_version: None,
        },
        entity: entities,
    };
    fs::write(dir.join(snapshot_file_name(at)), message.encode_to_vec()).unwrap();
}

/// Creates `<root>/mta-gtfs-<feed>/<date>` dirs for Jan 18 and 19.
fn scratch_tree(name: &str, feed_id: u32) -> (PathBuf, PathBuf, PathBuf) {
    let root = std::env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&root);
    let feed_root = root.join(format!("mta-gtfs-{feed_id}"));
    let day_of = feed_root.join("2018-01-18");
    let day_after = feed_root.join("2018-01-19");
    fs::create_dir_all(&day_of).unwrap();
    fs::create_dir_all(&day_after).unwrap();
    (root, day_of, day_after)
}

fn scratch_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(name);
    let _ = fs::remove_file(&path);
    path
}

fn half_day_window() -> CompileOptions {
    CompileOptions {
        start: ny(18, 0, 0),
        end: ny(18, 12, 0),
        allow_missing_lookahead: false,
    }
}

async fn all_rows(pool: &sqlx::SqlitePool) -> Vec<(String, String, String)> {
    sqlx::query_as("SELECT unique_trip_id, stop_id, action FROM Logbooks ORDER BY event_id")
        .fetch_all(pool)
        .await
        .unwrap()
}

/// Window [00:00, 12:00) with a 3 h lookahead to 15:00:
/// - trip `a` starts 11:59 and finishes 14:00 — included;
/// - trip `b` starts 12:30 and finishes 13:00 — excluded;
/// - trip `c` runs 00:05–00:10 — included;
/// - trip `d` is cancelled after one stop — dropped as partial;
/// - a 15:30 snapshot lies past the terminus and is never read.
#[tokio::test]
async fn test_window_boundary_round_trip() {
    let (root, day_of, _day_after) = scratch_tree("gtfs_rt_archiver_it_window", 1);

    write_snapshot(
        &day_of,
        &ny(18, 0, 5),
        vec![
            trip_update("c", "1", &["C1", "C2"]),
            stopped_at("c", "C1"),
            trip_update("d", "3", &["D1", "D2", "D3"]),
            stopped_at("d", "D1"),
        ],
    );
    write_snapshot(
        &day_of,
        &ny(18, 0, 10),
        vec![
            trip_update("c", "1", &["C2"]),
            stopped_at("c", "C2"),
            trip_update("d", "3", &["D2", "D3"]),
        ],
    );
    write_snapshot(
        &day_of,
        &ny(18, 11, 59),
        vec![trip_update("a", "1", &["A1", "A2"]), stopped_at("a", "A1")],
    );
    write_snapshot(
        &day_of,
        &ny(18, 12, 30),
        vec![
            trip_update("a", "1", &["A2"]),
            trip_update("b", "2", &["B1", "B2"]),
            stopped_at("b", "B1"),
        ],
    );
    write_snapshot(
        &day_of,
        &ny(18, 13, 0),
        vec![
            trip_update("a", "1", &["A2"]),
            trip_update("b", "2", &["B2"]),
            stopped_at("b", "B2"),
        ],
    );
    write_snapshot(
        &day_of,
        &ny(18, 14, 0),
        vec![trip_update("a", "1", &["A2"]), stopped_at("a", "A2")],
    );
    write_snapshot(&day_of, &ny(18, 14, 10), vec![]);
    // Past the lookahead terminus; must not be read at all.
    write_snapshot(
        &day_of,
        &ny(18, 15, 30),
        vec![trip_update("e", "5", &["E1", "E2"]), stopped_at("e", "E1")],
    );

    let db_path = scratch_db("gtfs_rt_archiver_it_window.sqlite");
    let pool = db::open(&db_path).await.unwrap();
    let config = FeedConfig::default();

    let outcome = compile_feed(&pool, &root, &config, &half_day_window(), 1)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Success);

    let rows = all_rows(&pool).await;
    let trips: std::collections::BTreeSet<&str> =
        rows.iter().map(|(t, _, _)| t.as_str()).collect();

    let a_id = format!("a_{}", ny(18, 11, 59).timestamp());
    let c_id = format!("c_{}", ny(18, 0, 5).timestamp());
    let expected: std::collections::BTreeSet<&str> =
        [a_id.as_str(), c_id.as_str()].into_iter().collect();
    assert_eq!(trips, expected);

    // Both surviving trips are fully confirmed two-stop logs.
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|(_, _, action)| action == "STOPPED_AT"));

    pool.close().await;
    fs::remove_dir_all(&root).unwrap();
    fs::remove_file(&db_path).unwrap();
}

/// Two corrupt snapshots among eight valid ones: the run reports exactly two
/// skips, processes the rest, and writes the complete trip.
#[tokio::test]
async fn test_corrupt_snapshots_are_skipped() {
    let (root, day_of, _day_after) = scratch_tree("gtfs_rt_archiver_it_corrupt", 1);

    let all_stops = ["X1", "X2", "X3", "X4", "X5", "X6", "X7", "X8"];
    for i in 0..8u32 {
        let pending: Vec<&str> = all_stops[i as usize..].to_vec();
        write_snapshot(
            &day_of,
            &ny(18, 1, i * 5),
            vec![
                trip_update("x", "1", &pending),
                stopped_at("x", all_stops[i as usize]),
            ],
        );
    }

    // Invalid protobuf and an empty body (decodes, but carries no header
    // timestamp) both count as skips.
    fs::write(
        day_of.join(snapshot_file_name(&ny(18, 2, 0))),
        b"not a protobuf snapshot",
    )
    .unwrap();
    fs::write(day_of.join(snapshot_file_name(&ny(18, 2, 5))), b"").unwrap();

    let db_path = scratch_db("gtfs_rt_archiver_it_corrupt.sqlite");
    let pool = db::open(&db_path).await.unwrap();
    let config = FeedConfig::default();

    let outcome = compile_feed(&pool, &root, &config, &half_day_window(), 1)
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Partial { skipped: 2 });

    let rows = all_rows(&pool).await;
    assert_eq!(rows.len(), 8);
    let stops: Vec<&str> = rows.iter().map(|(_, s, _)| s.as_str()).collect();
    assert_eq!(stops, all_stops);

    pool.close().await;
    fs::remove_dir_all(&root).unwrap();
    fs::remove_file(&db_path).unwrap();
}

/// The day-after directory is a hard precondition unless the operator opts
/// out.
#[tokio::test]
async fn test_missing_lookahead_directory_policy() {
    let (root, _day_of, day_after) = scratch_tree("gtfs_rt_archiver_it_lookahead", 1);
    fs::remove_dir_all(&day_after).unwrap();

    let db_path = scratch_db("gtfs_rt_archiver_it_lookahead.sqlite");
    let pool = db::open(&db_path).await.unwrap();
    let config = FeedConfig::default();

    let strict = compile_feed(&pool, &root, &config, &half_day_window(), 1).await;
    assert!(strict.is_err());
    assert!(format!("{:#}", strict.unwrap_err()).contains("allow-missing-lookahead"));

    let mut relaxed_opts = half_day_window();
    relaxed_opts.allow_missing_lookahead = true;
    let relaxed = compile_feed(&pool, &root, &config, &relaxed_opts, 1)
        .await
        .unwrap();
    assert_eq!(relaxed, RunOutcome::Success);

    pool.close().await;
    fs::remove_dir_all(&root).unwrap();
    fs::remove_file(&db_path).unwrap();
}

/// One feed failing fatally must not stop the others from compiling.
#[tokio::test]
async fn test_fatal_feed_does_not_block_the_rest() {
    let (root, day_of, _day_after) = scratch_tree("gtfs_rt_archiver_it_isolation", 1);
    // Feed 2 has no directory tree at all.

    write_snapshot(
        &day_of,
        &ny(18, 9, 0),
        vec![trip_update("t", "1", &["S1", "S2"]), stopped_at("t", "S1")],
    );
    write_snapshot(
        &day_of,
        &ny(18, 9, 5),
        vec![trip_update("t", "1", &["S2"]), stopped_at("t", "S2")],
    );
    write_snapshot(&day_of, &ny(18, 9, 10), vec![]);

    let db_path = scratch_db("gtfs_rt_archiver_it_isolation.sqlite");
    let pool = db::open(&db_path).await.unwrap();
    let config = FeedConfig {
        feeds: vec![2, 1],
        ..Default::default()
    };

    let outcomes = compile_all(&pool, &root, &config, &half_day_window()).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].1.is_fatal());
    assert_eq!(outcomes[1].1, RunOutcome::Success);

    assert_eq!(all_rows(&pool).await.len(), 2);

    pool.close().await;
    fs::remove_dir_all(&root).unwrap();
    fs::remove_file(&db_path).unwrap();
}
