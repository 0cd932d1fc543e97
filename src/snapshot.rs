//! Local snapshot persistence
//!
//! A single-slot SQLite store holding the last good record set as a JSON
//! document `{records, metadata, timestamp}`. On startup a snapshot younger
//! than the freshness window seeds the record store before any network
//! fetch; a corrupt or stale snapshot is discarded with a log entry, never
//! an error.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::TradeRecord;

const SNAPSHOT_SLOT: &str = "records";

/// The persisted document
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub records: Vec<TradeRecord>,
    pub metadata: SnapshotMetadata,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub record_count: usize,
    pub anomalies: u64,
}

/// Single-slot snapshot store backed by SQLite
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open snapshot database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                slot TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            [],
        )?;

        debug!("Snapshot store ready at {}", db_path.display());
        Ok(Self { conn })
    }

    /// In-memory store, for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS snapshots (
                slot TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Persist the current record set, replacing the previous snapshot
    pub fn save(&self, records: Vec<TradeRecord>, anomalies: u64) -> Result<()> {
        let snapshot = StoredSnapshot {
            metadata: SnapshotMetadata {
                record_count: records.len(),
                anomalies,
            },
            records,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&snapshot)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO snapshots (slot, payload, saved_at)
             VALUES (?1, ?2, ?3)",
            params![SNAPSHOT_SLOT, payload, snapshot.timestamp.to_rfc3339()],
        )?;

        debug!(
            "Snapshot saved: {} records at {}",
            snapshot.metadata.record_count, snapshot.timestamp
        );
        Ok(())
    }

    /// Load the snapshot if it exists, parses, and is younger than
    /// `max_age`. Anything else is discarded silently.
    pub fn load_fresh(&self, max_age: Duration) -> Option<StoredSnapshot> {
        let payload: String = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots WHERE slot = ?1",
                params![SNAPSHOT_SLOT],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!("Snapshot read failed, ignoring: {}", e);
                None
            })?;

        let snapshot: StoredSnapshot = match serde_json::from_str(&payload) {
            Ok(s) => s,
            Err(e) => {
                warn!("Corrupt snapshot discarded: {}", e);
                return None;
            }
        };

        let age = Utc::now() - snapshot.timestamp;
        if age > max_age {
            debug!(
                "Stale snapshot discarded ({}s old, window {}s)",
                age.num_seconds(),
                max_age.num_seconds()
            );
            return None;
        }

        info!(
            "Loaded snapshot: {} records, {}s old",
            snapshot.metadata.record_count,
            age.num_seconds()
        );
        Some(snapshot)
    }

    /// Drop the persisted snapshot
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute("DELETE FROM snapshots WHERE slot = ?1", params![SNAPSHOT_SLOT])?;
        Ok(())
    }
}
