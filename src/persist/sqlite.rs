//! SQLite-backed indexed storage for cached notes and the mutation queue.

use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use rusqlite::{Connection, OptionalExtension, Transaction, params, types::Type};
use serde::de::DeserializeOwned;

use crate::{
    note::CachedNote,
    op::MutationQueueItem,
    types::{MutationStatus, QueueItemId, Timestamp},
};

use super::{
    LoadParams, OFFLINE_CACHE_LIMIT_BYTES, PersistError, PersistResult, StorageAdapter,
    decode_record, encode_record, plan_eviction,
};

const PENDING_BATCH_INDEXED: &str = "SELECT payload FROM queue INDEXED BY idx_queue_status_ts \
     WHERE status = ?1 ORDER BY client_updated_secs ASC, client_updated_nanos ASC, id ASC LIMIT ?2";

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite implementation of [`StorageAdapter`].
///
/// The connection is opened lazily on first use and closed by
/// [`StorageAdapter::clear_all`]; the next call reopens it.
pub struct SqliteStorage {
    location: Location,
    conn: Mutex<Option<Connection>>,
    limit_bytes: usize,
}

impl SqliteStorage {
    /// Storage backed by the database file at `path`.
    ///
    /// Uses WAL mode and `synchronous=NORMAL` once opened.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::with_location(Location::File(path.as_ref().to_path_buf()))
    }

    /// Storage backed by a private in-memory database.
    pub fn open_in_memory() -> Self {
        Self::with_location(Location::Memory)
    }

    fn with_location(location: Location) -> Self {
        Self {
            location,
            conn: Mutex::new(None),
            limit_bytes: OFFLINE_CACHE_LIMIT_BYTES,
        }
    }

    /// Overrides the byte budget used by `enforce_limit`.
    pub fn with_limit_bytes(mut self, limit_bytes: usize) -> Self {
        self.limit_bytes = limit_bytes;
        self
    }

    /// Opens the connection now, surfacing any failure.
    pub fn probe(&self) -> PersistResult<()> {
        self.with_conn(|_| Ok(()))
    }

    /// True while a connection handle is held.
    pub fn is_open(&self) -> bool {
        self.conn.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    fn connect(&self) -> PersistResult<Connection> {
        let conn = match &self.location {
            Location::File(path) => {
                let conn = Connection::open(path)?;
                conn.pragma_update(None, "journal_mode", "WAL")?;
                conn.pragma_update(None, "synchronous", "NORMAL")?;
                conn
            }
            Location::Memory => Connection::open_in_memory()?,
        };
        conn.execute_batch(include_str!("schema.sql"))?;
        tracing::debug!(location = ?self.location, "opened offline sqlite store");
        Ok(conn)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> PersistResult<T>) -> PersistResult<T> {
        let mut guard = self.conn.lock().map_err(|_| PersistError::LockPoisoned)?;
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| PersistError::Message("sqlite connection unavailable".to_string()))?;
        f(conn)
    }

    fn full_scan_pending(conn: &Connection, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        let mut items: Vec<MutationQueueItem> = query_payloads(conn, "SELECT payload FROM queue", [])?
            .into_iter()
            .filter(|item: &MutationQueueItem| item.status == MutationStatus::Pending)
            .collect();
        items.sort_by(MutationQueueItem::replay_cmp);
        items.truncate(size);
        Ok(items)
    }
}

impl StorageAdapter for SqliteStorage {
    fn load_notes(&self, params: LoadParams) -> PersistResult<Vec<CachedNote>> {
        let limit = params.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = params.offset.unwrap_or(0) as i64;
        self.with_conn(|conn| {
            query_payloads(
                conn,
                "SELECT payload FROM notes ORDER BY rowid LIMIT ?1 OFFSET ?2",
                params![limit, offset],
            )
        })
    }

    fn save_note(&self, note: &CachedNote) -> PersistResult<()> {
        self.save_notes(std::slice::from_ref(note))
    }

    fn save_notes(&self, notes: &[CachedNote]) -> PersistResult<()> {
        if notes.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for note in notes {
                write_note(&tx, note)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn delete_note(&self, id: &str) -> PersistResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM notes WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    fn mark_synced(&self, id: &str, updated_at: Timestamp) -> PersistResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(mut note) = read_one::<CachedNote>(&tx, "SELECT payload FROM notes WHERE id = ?1", id)?
            else {
                return Ok(());
            };
            note.mark_synced(updated_at);
            write_note(&tx, &note)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get_queue(&self) -> PersistResult<Vec<MutationQueueItem>> {
        self.with_conn(|conn| query_payloads(conn, "SELECT payload FROM queue ORDER BY rowid", []))
    }

    fn upsert_queue_item(&self, item: &MutationQueueItem) -> PersistResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            write_queue_item(&tx, item)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn upsert_queue(&self, items: &[MutationQueueItem]) -> PersistResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM queue", [])?;
            for item in items {
                write_queue_item(&tx, item)?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn get_pending_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            match query_payloads(
                conn,
                PENDING_BATCH_INDEXED,
                params![MutationStatus::Pending.as_str(), size as i64],
            ) {
                Ok(items) => Ok(items),
                Err(err) => {
                    tracing::warn!(error = %err, "status index unavailable, scanning queue");
                    Self::full_scan_pending(conn, size)
                }
            }
        })
    }

    fn pop_queue_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let batch: Vec<MutationQueueItem> = query_payloads(
                &tx,
                "SELECT payload FROM queue ORDER BY client_updated_secs ASC, client_updated_nanos ASC, id ASC LIMIT ?1",
                params![size as i64],
            )?;
            {
                let mut stmt = tx.prepare("DELETE FROM queue WHERE id = ?1")?;
                for item in &batch {
                    stmt.execute(params![item.id])?;
                }
            }
            tx.commit()?;
            Ok(batch)
        })
    }

    fn remove_queue_items(&self, ids: &[QueueItemId]) -> PersistResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM queue WHERE id = ?1")?;
                for id in ids {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn mark_queue_item_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<&str>,
    ) -> PersistResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let Some(mut item) =
                read_one::<MutationQueueItem>(&tx, "SELECT payload FROM queue WHERE id = ?1", id)?
            else {
                return Ok(());
            };
            item.status = status;
            item.last_error = last_error.map(str::to_string);
            write_queue_item(&tx, &item)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn enforce_limit(&self) -> PersistResult<usize> {
        let limit = self.limit_bytes;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let notes: Vec<CachedNote> = query_payloads(&tx, "SELECT payload FROM notes", [])?;
            let queue: Vec<MutationQueueItem> = query_payloads(&tx, "SELECT payload FROM queue", [])?;
            let evicted = plan_eviction(&notes, &queue, limit)?;
            if evicted.is_empty() {
                return Ok(0);
            }
            {
                let mut stmt = tx.prepare("DELETE FROM notes WHERE id = ?1")?;
                for id in &evicted {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            tracing::info!(evicted = evicted.len(), limit, "evicted cached notes over budget");
            Ok(evicted.len())
        })
    }

    fn clear_all(&self) -> PersistResult<()> {
        let mut guard = self.conn.lock().map_err(|_| PersistError::LockPoisoned)?;
        let conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        conn.execute_batch("DELETE FROM notes; DELETE FROM queue;")?;
        conn.close().map_err(|(_, err)| PersistError::from(err))?;
        tracing::debug!("cleared offline sqlite store and closed handle");
        Ok(())
    }

    fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }
}

/// Column pair that sorts like the timestamp itself over its whole range.
fn sort_key(ts: Timestamp) -> (i64, i64) {
    (ts.timestamp(), i64::from(ts.timestamp_subsec_nanos()))
}

fn write_note(tx: &Transaction<'_>, note: &CachedNote) -> PersistResult<()> {
    let payload = encode_record(note)?;
    let (secs, nanos) = sort_key(note.updated_at);
    tx.execute(
        "INSERT INTO notes(id, user_id, updated_secs, updated_nanos, payload) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(id) DO UPDATE SET user_id = excluded.user_id, updated_secs = excluded.updated_secs, \
         updated_nanos = excluded.updated_nanos, payload = excluded.payload",
        params![note.id, note.user_id, secs, nanos, payload],
    )?;
    Ok(())
}

fn write_queue_item(tx: &Transaction<'_>, item: &MutationQueueItem) -> PersistResult<()> {
    let payload = encode_record(item)?;
    let (secs, nanos) = sort_key(item.client_updated_at);
    tx.execute(
        "INSERT INTO queue(id, note_id, status, client_updated_secs, client_updated_nanos, payload) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(id) DO UPDATE SET note_id = excluded.note_id, status = excluded.status, \
         client_updated_secs = excluded.client_updated_secs, \
         client_updated_nanos = excluded.client_updated_nanos, payload = excluded.payload",
        params![item.id, item.note_id, item.status.as_str(), secs, nanos, payload],
    )?;
    Ok(())
}

fn read_one<T: DeserializeOwned>(conn: &Connection, sql: &str, id: &str) -> PersistResult<Option<T>> {
    let payload: Option<Vec<u8>> = conn
        .query_row(sql, params![id], |row| row.get(0))
        .optional()?;
    let Some(payload) = payload else {
        return Ok(None);
    };
    decode_record(&payload).map(Some).map_err(PersistError::Message)
}

fn query_payloads<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> PersistResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        let payload: Vec<u8> = row.get(0)?;
        decode_record(&payload).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                payload.len(),
                Type::Blob,
                Box::new(std::io::Error::other(err)),
            )
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}
