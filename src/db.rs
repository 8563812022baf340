//! SQLite persistence for the two derived tables.
//!
//! Both tables are append-only from this crate's point of view. Appends run
//! inside a single transaction per batch so an interrupted compile never
//! leaves a half-written trip behind.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;

use crate::logbook::StopEvent;

/// One row of the `Stops` table, in its fixed column order.
#[derive(Debug, Clone, PartialEq)]
pub struct StopRow {
    pub stop_id: String,
    pub stop_name: Option<String>,
    pub stop_lat: Option<f64>,
    pub stop_lon: Option<f64>,
    pub authority_start_time: i64,
    pub authority_end_time: i64,
    pub dominant_route: Option<String>,
    /// Position of the row within its batch. Unique together with the
    /// authority window start.
    pub authority_id: i64,
}

/// Opens (creating if missing) the database at `path` and ensures the
/// schema exists.
pub async fn open(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    ensure_schema(&pool).await?;
    Ok(pool)
}

async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS Logbooks (
            event_id INTEGER PRIMARY KEY AUTOINCREMENT,
            trip_id TEXT NOT NULL,
            unique_trip_id TEXT NOT NULL,
            route_id TEXT NOT NULL,
            action TEXT NOT NULL,
            minimum_time REAL,
            maximum_time REAL,
            stop_id TEXT NOT NULL,
            latest_information_time REAL NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS Stops (
            stop_id TEXT NOT NULL,
            stop_name TEXT,
            stop_lat REAL,
            stop_lon REAL,
            authority_start_time REAL NOT NULL,
            authority_end_time REAL NOT NULL,
            dominant_route TEXT,
            authority_id INTEGER NOT NULL,
            PRIMARY KEY (authority_start_time, authority_id)
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Appends a batch of logbook events in one transaction.
pub async fn append_logbook(pool: &SqlitePool, events: &[StopEvent]) -> Result<usize> {
    let mut tx = pool.begin().await?;

    for event in events {
        sqlx::query(
            "INSERT INTO Logbooks
                (trip_id, unique_trip_id, route_id, action,
                 minimum_time, maximum_time, stop_id, latest_information_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.trip_id)
        .bind(&event.unique_trip_id)
        .bind(&event.route_id)
        .bind(event.action.as_str())
        .bind(event.minimum_time.map(|t| t as f64))
        .bind(event.maximum_time.map(|t| t as f64))
        .bind(&event.stop_id)
        .bind(event.latest_information_time as f64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(events.len())
}

/// Appends a batch of stop rows in one transaction.
pub async fn append_stops(pool: &SqlitePool, rows: &[StopRow]) -> Result<usize> {
    let mut tx = pool.begin().await?;

    for row in rows {
        sqlx::query(
            "INSERT INTO Stops
                (stop_id, stop_name, stop_lat, stop_lon,
                 authority_start_time, authority_end_time, dominant_route, authority_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.stop_id)
        .bind(&row.stop_name)
        .bind(row.stop_lat)
        .bind(row.stop_lon)
        .bind(row.authority_start_time as f64)
        .bind(row.authority_end_time as f64)
        .bind(&row.dominant_route)
        .bind(row.authority_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len())
}

/// Historical observation counts per `(stop_id, route_id)` pair, the input
/// to dominant-route selection.
pub async fn route_counts(pool: &SqlitePool) -> Result<Vec<(String, String, i64)>> {
    let rows = sqlx::query_as(
        "SELECT stop_id, route_id, COUNT(*)
         FROM Logbooks
         GROUP BY stop_id, route_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbook::Action;
    use std::path::PathBuf;

    fn scratch_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn sample_event(trip_id: &str, route_id: &str, stop_id: &str) -> StopEvent {
        StopEvent {
            trip_id: trip_id.to_string(),
            unique_trip_id: format!("{trip_id}_100"),
            route_id: route_id.to_string(),
            action: Action::StoppedAt,
            minimum_time: Some(100),
            maximum_time: Some(160),
            stop_id: stop_id.to_string(),
            latest_information_time: 160,
        }
    }

    #[tokio::test]
    async fn test_append_logbook_and_count() {
        let path = scratch_db("gtfs_rt_archiver_test_logbooks.sqlite");
        let pool = open(&path).await.unwrap();

        let events = vec![
            sample_event("t1", "6", "601N"),
            sample_event("t1", "6", "602N"),
        ];
        let written = append_logbook(&pool, &events).await.unwrap();
        assert_eq!(written, 2);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Logbooks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        pool.close().await;
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_route_counts_groups_pairs() {
        let path = scratch_db("gtfs_rt_archiver_test_counts.sqlite");
        let pool = open(&path).await.unwrap();

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(sample_event("t1", "6", "601N"));
        }
        events.push(sample_event("t2", "4", "601N"));
        append_logbook(&pool, &events).await.unwrap();

        let mut counts = route_counts(&pool).await.unwrap();
        counts.sort();
        assert_eq!(
            counts,
            vec![
                ("601N".to_string(), "4".to_string(), 1),
                ("601N".to_string(), "6".to_string(), 3),
            ]
        );

        pool.close().await;
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_append_stops_round_trip() {
        let path = scratch_db("gtfs_rt_archiver_test_stops.sqlite");
        let pool = open(&path).await.unwrap();

        let rows = vec![StopRow {
            stop_id: "601N".to_string(),
            stop_name: Some("Sheepshead Bay Rd".to_string()),
            stop_lat: Some(40.586),
            stop_lon: Some(-73.954),
            authority_start_time: 1514764800,
            authority_end_time: 1522540800,
            dominant_route: Some("6".to_string()),
            authority_id: 0,
        }];
        append_stops(&pool, &rows).await.unwrap();

        let (stop_id, dominant_route): (String, Option<String>) =
            sqlx::query_as("SELECT stop_id, dominant_route FROM Stops")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(stop_id, "601N");
        assert_eq!(dominant_route, Some("6".to_string()));

        pool.close().await;
        std::fs::remove_file(&path).unwrap();
    }
}
