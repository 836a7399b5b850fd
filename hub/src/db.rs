//! SQLite registry – node health rows and the clip catalog.
//!
//! Connections are opened per operation; WAL plus a busy timeout keeps
//! concurrent handler writes from tripping over each other.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use burrowcam_common::protocol::Heartbeat;

/// Timestamp format stored in the registry (UTC, second resolution).
pub const DB_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Row of the `nodes` table.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: String,
    pub last_seen: String,
    pub status: String,
    pub ip: Option<String>,
    pub version: Option<String>,
    pub free_space_pct: Option<f64>,
    pub queue_len: Option<u32>,
}

/// Create the registry tables if they don't exist.
pub fn initialize(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn =
        open(db_path).with_context(|| format!("Cannot open database: {}", db_path.display()))?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS nodes (
            node_id        TEXT PRIMARY KEY,
            last_seen      TEXT NOT NULL,
            status         TEXT NOT NULL,
            ip             TEXT,
            version        TEXT,
            free_space_pct REAL,
            queue_len      INTEGER
        );
        CREATE TABLE IF NOT EXISTS clips (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id   TEXT NOT NULL,
            filepath  TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS clips_node_time ON clips (node_id, timestamp DESC);
    ",
    )
    .context("Failed to create registry tables")?;

    info!("Database schema verified");
    Ok(())
}

fn open(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Insert or refresh a node row from an authenticated heartbeat.
pub fn upsert_node(
    db_path: &Path,
    hb: &Heartbeat,
    ip: Option<&str>,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let conn = open(db_path)?;
    conn.execute(
        "INSERT INTO nodes (node_id, last_seen, status, ip, version, free_space_pct, queue_len) \
         VALUES (?1, ?2, 'online', ?3, ?4, ?5, ?6) \
         ON CONFLICT(node_id) DO UPDATE SET \
             last_seen      = excluded.last_seen, \
             status         = excluded.status, \
             ip             = excluded.ip, \
             version        = excluded.version, \
             free_space_pct = excluded.free_space_pct, \
             queue_len      = excluded.queue_len",
        params![
            hb.node_id,
            now.format(DB_TIME_FORMAT).to_string(),
            ip,
            hb.version,
            hb.free_space_pct,
            hb.queue_len,
        ],
    )?;
    Ok(())
}

/// Catalog one received clip. `filepath` is relative to the storage base.
pub fn insert_clip(
    db_path: &Path,
    node_id: &str,
    filepath: &str,
    received: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let conn = open(db_path)?;
    conn.execute(
        "INSERT INTO clips (node_id, filepath, timestamp) VALUES (?1, ?2, ?3)",
        params![node_id, filepath, received.format(DB_TIME_FORMAT).to_string()],
    )?;
    Ok(())
}

pub fn fetch_nodes(db_path: &Path) -> rusqlite::Result<Vec<NodeRecord>> {
    let conn = open(db_path)?;
    let mut stmt = conn.prepare(
        "SELECT node_id, last_seen, status, ip, version, free_space_pct, queue_len \
         FROM nodes ORDER BY node_id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(NodeRecord {
            node_id: row.get(0)?,
            last_seen: row.get(1)?,
            status: row.get(2)?,
            ip: row.get(3)?,
            version: row.get(4)?,
            free_space_pct: row.get(5)?,
            queue_len: row.get(6)?,
        })
    })?;
    rows.collect()
}

/// Liveness derived from `last_seen` at read time. Rows are never expired
/// or deleted; an unparseable timestamp reads as offline.
pub fn status_from_last_seen(
    last_seen: &str,
    now: DateTime<Utc>,
    online_sec: u64,
    stale_sec: u64,
) -> &'static str {
    let Ok(seen) = NaiveDateTime::parse_from_str(last_seen, DB_TIME_FORMAT) else {
        return "offline";
    };
    let age = now.signed_duration_since(seen.and_utc());
    if age <= chrono::Duration::seconds(online_sec as i64) {
        "online"
    } else if age <= chrono::Duration::seconds(stale_sec as i64) {
        "stale"
    } else {
        "offline"
    }
}

// ─── tests ───────────────────────────────────────────────────────────
