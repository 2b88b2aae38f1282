//! SQLite adapter for the read-along database.
//!
//! The read-along app owns this database and writes to it concurrently, so
//! every operation opens its own connection with a busy timeout and every
//! write happens inside a single transaction. All of the app's timestamp
//! heterogeneity (float seconds, float milliseconds, datetime strings) is
//! coerced here; the rest of the system only ever sees milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use tokio::task;
use tracing::{debug, info, warn};

use crate::adapters::{ReadalongDb, ReadalongPosition, SourceError};

/// Milliseconds added on top of the stored timestamp so the app's client
/// cache can never clobber our write.
const LEAPFROG_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct ReadalongStore {
    db_path: PathBuf,
    user_id: Option<String>,
}

struct PositionRow {
    uuid: String,
    user_id: String,
    locator: serde_json::Value,
    timestamp_ms: i64,
}

impl ReadalongStore {
    pub fn new(db_path: impl Into<PathBuf>, user_id: Option<String>) -> Self {
        Self {
            db_path: db_path.into(),
            user_id,
        }
    }

    fn connect(path: &Path) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(10))?;
        Ok(conn)
    }

    async fn latest_position(
        &self,
        ebook_file: &str,
    ) -> Result<Option<PositionRow>, SourceError> {
        let path = self.db_path.clone();
        let user_id = self.user_id.clone();
        let ebook_file = ebook_file.to_string();
        task::spawn_blocking(move || -> Result<Option<PositionRow>, SourceError> {
            let conn = Self::connect(&path)?;
            let Some((book_uuid, _title)) = find_book(&conn, &ebook_file)? else {
                return Ok(None);
            };
            let rows = positions_for_book(&conn, &book_uuid, user_id.as_deref())?;
            Ok(rows.into_iter().max_by_key(|r| r.timestamp_ms))
        })
        .await?
    }
}

#[async_trait]
impl ReadalongDb for ReadalongStore {
    async fn check_connection(&self) -> bool {
        let path = self.db_path.clone();
        let result = task::spawn_blocking(move || -> Result<(i64, i64), SourceError> {
            let conn = Self::connect(&path)?;
            let positions: i64 =
                conn.query_row("SELECT COUNT(*) FROM position", [], |row| row.get(0))?;
            let sessions: i64 =
                conn.query_row("SELECT COUNT(*) FROM session", [], |row| row.get(0))?;
            Ok((positions, sessions))
        })
        .await;
        match result {
            Ok(Ok((positions, sessions))) => {
                info!(positions, sessions, "read-along database reachable");
                true
            }
            Ok(Err(err)) => {
                warn!(%err, "read-along database unreachable");
                false
            }
            Err(_) => false,
        }
    }

    async fn get_progress(&self, ebook_file: &str) -> Result<(Option<f64>, i64), SourceError> {
        match self.latest_position(ebook_file).await? {
            Some(row) => {
                let fraction = progression_of(&row.locator).unwrap_or(0.0);
                debug!(ebook_file, fraction, "read-along progress read");
                Ok((Some(fraction), row.timestamp_ms))
            }
            None => Ok((None, 0)),
        }
    }

    async fn get_progress_with_anchor(
        &self,
        ebook_file: &str,
    ) -> Result<ReadalongPosition, SourceError> {
        match self.latest_position(ebook_file).await? {
            Some(row) => {
                let fragment_id = row
                    .locator
                    .pointer("/locations/fragments/0")
                    .and_then(|v| v.as_str())
                    .map(|s| s.trim_start_matches('#').to_string());
                Ok(ReadalongPosition {
                    fraction: Some(progression_of(&row.locator).unwrap_or(0.0)),
                    timestamp_ms: row.timestamp_ms,
                    href: row
                        .locator
                        .get("href")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    fragment_id,
                })
            }
            None => Ok(ReadalongPosition::default()),
        }
    }

    async fn update_progress(
        &self,
        ebook_file: &str,
        fraction: f64,
        source_ts_s: f64,
    ) -> Result<bool, SourceError> {
        let path = self.db_path.clone();
        let user_id = self.user_id.clone();
        let ebook_file = ebook_file.to_string();
        task::spawn_blocking(move || -> Result<bool, SourceError> {
            let mut conn = Self::connect(&path)?;
            let tx = conn.transaction()?;

            let Some((book_uuid, title)) = find_book(&tx, &ebook_file)? else {
                warn!(%ebook_file, "book not present in read-along database");
                return Ok(false);
            };
            let rows = positions_for_book(&tx, &book_uuid, user_id.as_deref())?;
            if rows.is_empty() {
                warn!(%title, "book has no position rows to update");
                return Ok(false);
            }

            let stored_max_ms = rows.iter().map(|r| r.timestamp_ms).max().unwrap_or(0);
            let now_ms = (source_ts_s * 1000.0) as i64;
            let write_ts_ms = now_ms.max(stored_max_ms + LEAPFROG_MS);
            let updated_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

            let count = rows.len();
            for row in rows {
                let mut locator = row.locator;
                if !locator.is_object() {
                    locator = json!({});
                }
                locator["locations"]["totalProgression"] = json!(fraction);
                tx.execute(
                    "UPDATE position SET locator = ?1, timestamp = ?2, updated_at = ?3 \
                     WHERE uuid = ?4",
                    params![locator.to_string(), write_ts_ms as f64, updated_at, row.uuid],
                )?;
                touch_session(&tx, &row.user_id, &updated_at)?;
            }
            tx.commit()?;
            info!(%title, fraction, rows = count, "read-along progress written");
            Ok(true)
        })
        .await?
    }
}

/// Resolve a book row by bidirectional case-insensitive containment between
/// title and filename.
fn find_book(
    conn: &Connection,
    ebook_file: &str,
) -> Result<Option<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT uuid, title FROM book")?;
    let needle = ebook_file.to_lowercase();
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (uuid, title) = row?;
        let t = title.to_lowercase();
        if t.contains(&needle) || needle.contains(&t) {
            return Ok(Some((uuid, title)));
        }
    }
    Ok(None)
}

fn positions_for_book(
    conn: &Connection,
    book_uuid: &str,
    user_id: Option<&str>,
) -> Result<Vec<PositionRow>, rusqlite::Error> {
    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match user_id.as_ref() {
        Some(user) => (
            "SELECT uuid, user_id, locator, timestamp FROM position \
             WHERE book_uuid = ?1 AND user_id = ?2",
            vec![&book_uuid as &dyn rusqlite::ToSql, user as &dyn rusqlite::ToSql],
        ),
        None => (
            "SELECT uuid, user_id, locator, timestamp FROM position WHERE book_uuid = ?1",
            vec![&book_uuid as &dyn rusqlite::ToSql],
        ),
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params.as_slice(), |row| {
        let raw: String = row.get(2)?;
        let ts: Value = row.get(3)?;
        Ok(PositionRow {
            uuid: row.get(0)?,
            user_id: row.get(1)?,
            locator: serde_json::from_str(&raw).unwrap_or_else(|_| json!({})),
            timestamp_ms: timestamp_to_ms(&ts),
        })
    })?;
    rows.collect()
}

/// Touch the user's most recent session so the app notices the change.
fn touch_session(
    conn: &Connection,
    user_id: &str,
    updated_at: &str,
) -> Result<(), rusqlite::Error> {
    // session ids are opaque; fetch and compare as stored
    let latest: Option<Value> = conn
        .query_row(
            "SELECT id FROM session WHERE user_id = ?1 ORDER BY updated_at DESC LIMIT 1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = latest {
        conn.execute(
            "UPDATE session SET updated_at = ?1 WHERE id = ?2",
            params![updated_at, id],
        )?;
    } else {
        debug!(user_id, "no session row to touch");
    }
    Ok(())
}

fn progression_of(locator: &serde_json::Value) -> Option<f64> {
    locator
        .pointer("/locations/totalProgression")
        .and_then(|v| v.as_f64())
}

/// Coerce any of the database's timestamp shapes to epoch milliseconds.
fn timestamp_to_ms(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => normalize_epoch(*i as f64),
        Value::Real(f) => normalize_epoch(*f),
        Value::Text(s) => parse_text_timestamp(s),
        _ => 0,
    }
}

fn normalize_epoch(v: f64) -> i64 {
    if v <= 0.0 {
        0
    } else if v < 10_000_000_000.0 {
        // looks like seconds
        (v * 1000.0) as i64
    } else {
        v as i64
    }
}

fn parse_text_timestamp(s: &str) -> i64 {
    if let Ok(v) = s.parse::<f64>() {
        return normalize_epoch(v);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00")) {
        return dt.timestamp_millis();
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc().timestamp_millis();
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn seed_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE book (uuid TEXT PRIMARY KEY, title TEXT);
             CREATE TABLE position (
                 uuid TEXT PRIMARY KEY, user_id TEXT, book_uuid TEXT,
                 locator TEXT, timestamp REAL, created_at TEXT, updated_at TEXT
             );
             CREATE TABLE session (
                 id INTEGER PRIMARY KEY, user_id TEXT, session_token TEXT,
                 expires TEXT, created_at TEXT, updated_at TEXT
             );",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO book (uuid, title) VALUES ('b-1', 'The Midnight Library')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO position (uuid, user_id, book_uuid, locator, timestamp, updated_at) \
             VALUES ('p-1', 'u-1', 'b-1', ?1, 1700000000000.0, '2023-11-14 22:13:20')",
            params![json!({
                "href": "OPS/s065-Chapter-048.xhtml",
                "locations": {
                    "totalProgression": 0.6,
                    "fragments": ["s065-sentence186"]
                }
            })
            .to_string()],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO session (id, user_id, session_token, updated_at) \
             VALUES (1, 'u-1', 'tok', '2023-11-14 00:00:00')",
            [],
        )
        .unwrap();
    }

    fn store(path: &Path) -> ReadalongStore {
        ReadalongStore::new(path, None)
    }

    #[tokio::test]
    async fn reads_progress_and_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readalong.db");
        seed_db(&db);

        let (fraction, ts) = store(&db)
            .get_progress("The Midnight Library.epub")
            .await
            .unwrap();
        assert_eq!(fraction, Some(0.6));
        assert_eq!(ts, 1_700_000_000_000);

        let pos = store(&db)
            .get_progress_with_anchor("The Midnight Library.epub")
            .await
            .unwrap();
        assert_eq!(pos.href.as_deref(), Some("OPS/s065-Chapter-048.xhtml"));
        assert_eq!(pos.fragment_id.as_deref(), Some("s065-sentence186"));
    }

    #[tokio::test]
    async fn absent_book_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readalong.db");
        seed_db(&db);
        let (fraction, ts) = store(&db).get_progress("unknown.epub").await.unwrap();
        assert_eq!((fraction, ts), (None, 0));
    }

    #[tokio::test]
    async fn write_leapfrogs_the_stored_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readalong.db");
        seed_db(&db);
        let s = store(&db);

        // "now" earlier than the stored row: write must still land ahead
        let ok = s
            .update_progress("The Midnight Library.epub", 0.75, 1_600_000_000.0)
            .await
            .unwrap();
        assert!(ok);

        let (fraction, ts) = s
            .get_progress("The Midnight Library.epub")
            .await
            .unwrap();
        assert_eq!(fraction, Some(0.75));
        assert_eq!(ts, 1_700_000_000_000 + LEAPFROG_MS);

        // unrelated locator fields survive the rewrite
        let pos = s
            .get_progress_with_anchor("The Midnight Library.epub")
            .await
            .unwrap();
        assert_eq!(pos.fragment_id.as_deref(), Some("s065-sentence186"));
    }

    #[tokio::test]
    async fn write_touches_the_latest_session() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readalong.db");
        seed_db(&db);
        store(&db)
            .update_progress("The Midnight Library.epub", 0.5, 1_800_000_000.0)
            .await
            .unwrap();

        let conn = Connection::open(&db).unwrap();
        let updated_at: String = conn
            .query_row("SELECT updated_at FROM session WHERE id = 1", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_ne!(updated_at, "2023-11-14 00:00:00");
    }

    #[tokio::test]
    async fn write_without_book_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("readalong.db");
        seed_db(&db);
        let ok = store(&db)
            .update_progress("unknown.epub", 0.5, 1_800_000_000.0)
            .await
            .unwrap();
        assert!(!ok);
    }

    #[rstest]
    #[case(Value::Real(1_767_016_380_036.0), 1_767_016_380_036)]
    #[case(Value::Real(1_700_000_000.5), 1_700_000_000_500)]
    #[case(Value::Integer(1_700_000_000), 1_700_000_000_000)]
    #[case(Value::Text("2025-12-29 13:53:00".into()), 1_767_016_380_000)]
    #[case(Value::Text("not a date".into()), 0)]
    #[case(Value::Null, 0)]
    fn timestamp_coercion(#[case] raw: Value, #[case] expected: i64) {
        assert_eq!(timestamp_to_ms(&raw), expected);
    }
}
