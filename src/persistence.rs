//! # SQLite Checkpoint Store
//!
//! Alternative to [`FileCheckpointStore`](crate::FileCheckpointStore) for
//! apps that already keep an SQLite database. The checkpoint is a single row
//! holding a MessagePack blob (field names included, so older blobs missing
//! newer fields still decode with defaults).
//!
//! Replacing the row happens inside one statement, so a crash mid-save leaves
//! the previous checkpoint intact.

use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::checkpoint::{CheckpointStore, SessionCheckpoint};
use crate::error::Result;

/// Row id of the single active checkpoint.
const ACTIVE_SLOT: i64 = 1;

/// Checkpoint store backed by an SQLite database.
pub struct SqliteCheckpointStore {
    db: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        debug!("[Checkpoint] Opened SQLite store at {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS active_checkpoint (
                slot INTEGER PRIMARY KEY,
                saved_at REAL NOT NULL,
                point_count INTEGER NOT NULL,
                data BLOB NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|poisoned| {
            warn!("[Checkpoint] SQLite lock poisoned, reusing connection");
            poisoned.into_inner()
        })
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        let data = rmp_serde::to_vec_named(checkpoint)?;
        let saved_at = checkpoint
            .route
            .last()
            .map(|p| p.timestamp)
            .unwrap_or(checkpoint.started_at);
        self.conn().execute(
            "INSERT OR REPLACE INTO active_checkpoint (slot, saved_at, point_count, data)
             VALUES (?, ?, ?, ?)",
            params![ACTIVE_SLOT, saved_at, checkpoint.route.len() as i64, data],
        )?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionCheckpoint>> {
        let blob: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT data FROM active_checkpoint WHERE slot = ?",
                params![ACTIVE_SLOT],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            Some(blob) => {
                let checkpoint: SessionCheckpoint = rmp_serde::from_slice(&blob)?;
                checkpoint.validate()?;
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    fn clear(&self) -> Result<()> {
        self.conn()
            .execute("DELETE FROM active_checkpoint WHERE slot = ?", params![ACTIVE_SLOT])?;
        Ok(())
    }
}
