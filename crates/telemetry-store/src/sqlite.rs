// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! SQLite-backed durable store.
//!
//! One table keyed by id, with secondary indexes on timestamp, kind, and
//! priority so the replay scan (priority descending, timestamp ascending)
//! does not walk the whole table.

use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{NewRecord, RecordKind, StoredRecord};
use crate::store::{DurableStore, RetentionConfig};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pending_records (
    id           TEXT PRIMARY KEY,
    kind         TEXT NOT NULL,
    payload      TEXT NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    retry_count  INTEGER NOT NULL DEFAULT 0,
    priority     INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_pending_timestamp ON pending_records (timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_pending_kind ON pending_records (kind);
CREATE INDEX IF NOT EXISTS idx_pending_priority ON pending_records (priority);
";

/// Durable store backed by a local SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    retention: RetentionConfig,
}

impl SqliteStore {
    /// Open (or create) a store backed by a file on disk.
    pub fn open(path: &Path, retention: RetentionConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory(retention: RetentionConfig) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retention,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("lock poisoned")
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<(String, String, String, i64, u32, i32)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode(raw: (String, String, String, i64, u32, i32)) -> Result<StoredRecord, StoreError> {
    let (id, kind, payload, timestamp_ms, retry_count, priority) = raw;
    Ok(StoredRecord {
        id,
        kind: RecordKind::parse(&kind)?,
        data: serde_json::from_str(&payload)?,
        timestamp_ms,
        retry_count,
        priority,
    })
}

impl DurableStore for SqliteStore {
    fn save(&self, record: NewRecord) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&record.data)?;
        self.lock().execute(
            "INSERT INTO pending_records (id, kind, payload, timestamp_ms, retry_count, priority)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                id,
                record.kind.as_str(),
                payload,
                record.timestamp_ms,
                record.priority
            ],
        )?;
        Ok(id)
    }

    fn save_batch(&self, records: Vec<NewRecord>) -> Result<Vec<String>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(records.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pending_records (id, kind, payload, timestamp_ms, retry_count, priority)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            )?;
            for record in records {
                let id = Uuid::new_v4().to_string();
                let payload = serde_json::to_string(&record.data)?;
                stmt.execute(params![
                    id,
                    record.kind.as_str(),
                    payload,
                    record.timestamp_ms,
                    record.priority
                ])?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    fn get_all(&self, limit: Option<usize>) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.lock();
        // rowid breaks same-millisecond ties so replay follows admission order
        let mut stmt = conn.prepare(
            "SELECT id, kind, payload, timestamp_ms, retry_count, priority
             FROM pending_records
             ORDER BY priority DESC, timestamp_ms ASC, rowid ASC
             LIMIT ?1",
        )?;
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map_or(-1i64, |n| n as i64);
        let rows = stmt.query_map(params![limit], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(decode(row?)?);
        }
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.lock()
            .execute("DELETE FROM pending_records WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn delete_batch(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM pending_records WHERE id = ?1")?;
            for id in ids {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn increment_retry(&self, id: &str) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE pending_records SET retry_count = retry_count + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM pending_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn cleanup(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let cutoff = now_ms() - self.retention.ttl.as_millis() as i64;
        let expired = conn.execute(
            "DELETE FROM pending_records WHERE timestamp_ms < ?1",
            params![cutoff],
        )?;

        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_records", [], |row| row.get(0))?;
        let mut evicted = 0;
        if count as usize > self.retention.max_items {
            let excess = count - self.retention.max_items as i64;
            evicted = conn.execute(
                "DELETE FROM pending_records WHERE id IN (
                     SELECT id FROM pending_records ORDER BY timestamp_ms ASC LIMIT ?1
                 )",
                params![excess],
            )?;
        }

        let purged = expired + evicted;
        if purged > 0 {
            debug!("Cleanup purged {expired} expired and {evicted} over-capacity records");
        }
        Ok(purged)
    }
}
