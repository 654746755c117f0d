//! Storage port for cached notes and the mutation queue.

pub mod kv;
pub mod sqlite;

use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    note::CachedNote,
    op::{MutationQueueItem, RECORD_FORMAT_VERSION, RecordEnvelope},
    types::{MutationStatus, NoteId, QueueItemId, Timestamp},
};

use self::{
    kv::{FileBackend, KvStorage, MemoryBackend},
    sqlite::SqliteStorage,
};

/// Default combined byte budget for cached notes plus the queue.
pub const OFFLINE_CACHE_LIMIT_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite failure, including aborted transactions.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Record (de)serialization failure.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// File-system failure in the key-value fallback.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// A thread panicked while holding the storage lock.
    #[error("storage lock poisoned")]
    LockPoisoned,
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Storage result alias.
pub type PersistResult<T> = Result<T, PersistError>;

/// Paging parameters for [`StorageAdapter::load_notes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadParams {
    /// Maximum number of notes to return.
    pub limit: Option<usize>,
    /// Number of notes to skip.
    pub offset: Option<usize>,
}

impl LoadParams {
    /// Every cached note.
    pub fn all() -> Self {
        Self::default()
    }

    /// One page of `limit` notes starting at `offset`.
    pub fn page(limit: usize, offset: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }
}

/// Persistence contract shared by the indexed and key-value backends.
///
/// Every method is one atomic unit: composite steps (read, compute, write)
/// never interleave with another caller on the same adapter.
pub trait StorageAdapter: Send + Sync {
    /// Returns a page of cached notes in backend order.
    fn load_notes(&self, params: LoadParams) -> PersistResult<Vec<CachedNote>>;
    /// Upserts one note by id.
    fn save_note(&self, note: &CachedNote) -> PersistResult<()>;
    /// Upserts many notes by id.
    fn save_notes(&self, notes: &[CachedNote]) -> PersistResult<()>;
    /// Deletes a note; no-op when absent.
    fn delete_note(&self, id: &str) -> PersistResult<()>;
    /// Sets status synced, overwrites `updated_at`, clears pending ops; no-op when absent.
    fn mark_synced(&self, id: &str, updated_at: Timestamp) -> PersistResult<()>;

    /// Returns the whole queue in backend order.
    fn get_queue(&self) -> PersistResult<Vec<MutationQueueItem>>;
    /// Upserts one queue item by id.
    fn upsert_queue_item(&self, item: &MutationQueueItem) -> PersistResult<()>;
    /// Replaces the entire queue with `items`.
    fn upsert_queue(&self, items: &[MutationQueueItem]) -> PersistResult<()>;
    /// Up to `size` pending items ordered by `client_updated_at`.
    fn get_pending_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>>;
    /// Removes and returns up to `size` items of any status, oldest first.
    ///
    /// Legacy destructive dequeue; prefer [`Self::get_pending_batch`] plus
    /// [`Self::remove_queue_items`].
    fn pop_queue_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>>;
    /// Deletes items by id, ignoring unknown ids.
    fn remove_queue_items(&self, ids: &[QueueItemId]) -> PersistResult<()>;
    /// Sets status and last error; no-op when absent.
    fn mark_queue_item_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<&str>,
    ) -> PersistResult<()>;

    /// Evicts oldest notes until notes plus queue fit the byte budget.
    ///
    /// Returns the number of evicted notes. Queue items are never evicted.
    fn enforce_limit(&self) -> PersistResult<usize>;
    /// Wipes both tables.
    fn clear_all(&self) -> PersistResult<()>;
    /// Byte budget enforced by [`Self::enforce_limit`].
    fn limit_bytes(&self) -> usize;
}

impl<T: StorageAdapter + ?Sized> StorageAdapter for Arc<T> {
    fn load_notes(&self, params: LoadParams) -> PersistResult<Vec<CachedNote>> {
        (**self).load_notes(params)
    }
    fn save_note(&self, note: &CachedNote) -> PersistResult<()> {
        (**self).save_note(note)
    }
    fn save_notes(&self, notes: &[CachedNote]) -> PersistResult<()> {
        (**self).save_notes(notes)
    }
    fn delete_note(&self, id: &str) -> PersistResult<()> {
        (**self).delete_note(id)
    }
    fn mark_synced(&self, id: &str, updated_at: Timestamp) -> PersistResult<()> {
        (**self).mark_synced(id, updated_at)
    }
    fn get_queue(&self) -> PersistResult<Vec<MutationQueueItem>> {
        (**self).get_queue()
    }
    fn upsert_queue_item(&self, item: &MutationQueueItem) -> PersistResult<()> {
        (**self).upsert_queue_item(item)
    }
    fn upsert_queue(&self, items: &[MutationQueueItem]) -> PersistResult<()> {
        (**self).upsert_queue(items)
    }
    fn get_pending_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        (**self).get_pending_batch(size)
    }
    fn pop_queue_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        (**self).pop_queue_batch(size)
    }
    fn remove_queue_items(&self, ids: &[QueueItemId]) -> PersistResult<()> {
        (**self).remove_queue_items(ids)
    }
    fn mark_queue_item_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<&str>,
    ) -> PersistResult<()> {
        (**self).mark_queue_item_status(id, status, last_error)
    }
    fn enforce_limit(&self) -> PersistResult<usize> {
        (**self).enforce_limit()
    }
    fn clear_all(&self) -> PersistResult<()> {
        (**self).clear_all()
    }
    fn limit_bytes(&self) -> usize {
        (**self).limit_bytes()
    }
}

/// Storage selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; `None` opens an in-memory database.
    pub sqlite_path: Option<PathBuf>,
    /// Directory for the file-backed key-value fallback.
    pub fallback_dir: Option<PathBuf>,
    /// Skip SQLite and go straight to the key-value fallback.
    pub force_fallback: bool,
    /// Byte budget for notes plus queue.
    pub cache_limit_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            fallback_dir: None,
            force_fallback: false,
            cache_limit_bytes: OFFLINE_CACHE_LIMIT_BYTES,
        }
    }
}

/// Opens the best available backend for `config`.
///
/// SQLite is probed first; when it cannot be opened the file-backed
/// key-value store is used, and in-memory key-value storage as a last resort.
pub fn open_storage(config: &StorageConfig) -> Arc<dyn StorageAdapter> {
    let limit = config.cache_limit_bytes;

    if !config.force_fallback {
        let sqlite = match &config.sqlite_path {
            Some(path) => SqliteStorage::open(path),
            None => SqliteStorage::open_in_memory(),
        }
        .with_limit_bytes(limit);

        match sqlite.probe() {
            Ok(()) => {
                tracing::debug!(path = ?config.sqlite_path, "using sqlite offline storage");
                return Arc::new(sqlite);
            }
            Err(err) => {
                tracing::warn!(error = %err, "sqlite unavailable, falling back to key-value storage");
            }
        }
    }

    if let Some(dir) = &config.fallback_dir {
        match FileBackend::open(dir) {
            Ok(backend) => {
                tracing::debug!(dir = %dir.display(), "using file key-value offline storage");
                return Arc::new(KvStorage::new(backend).with_limit_bytes(limit));
            }
            Err(err) => {
                tracing::warn!(error = %err, dir = %dir.display(), "fallback directory unusable");
            }
        }
    }

    tracing::warn!("using volatile in-memory offline storage");
    Arc::new(KvStorage::new(MemoryBackend::default()).with_limit_bytes(limit))
}

/// Combined compact-JSON size of the notes array and the queue array.
pub fn serialized_size(notes: &[CachedNote], queue: &[MutationQueueItem]) -> PersistResult<usize> {
    Ok(serde_json::to_vec(notes)?.len() + serde_json::to_vec(queue)?.len())
}

/// Picks notes to evict, oldest `updated_at` first, so that notes plus
/// `queue` fit in `limit` bytes. Returns ids in eviction order.
pub fn plan_eviction(
    notes: &[CachedNote],
    queue: &[MutationQueueItem],
    limit: usize,
) -> PersistResult<Vec<NoteId>> {
    let queue_bytes = serde_json::to_vec(queue)?.len();

    let mut sized = Vec::with_capacity(notes.len());
    for note in notes {
        sized.push((note, serde_json::to_vec(note)?.len()));
    }
    let mut item_bytes: usize = sized.iter().map(|(_, len)| len).sum();
    let mut remaining = sized.len();

    let total = |item_bytes: usize, remaining: usize| {
        queue_bytes + json_array_len(item_bytes, remaining)
    };
    if total(item_bytes, remaining) <= limit {
        return Ok(Vec::new());
    }

    sized.sort_by(|(a, _), (b, _)| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

    let mut evicted = Vec::new();
    for (note, len) in sized {
        if total(item_bytes, remaining) <= limit {
            break;
        }
        item_bytes -= len;
        remaining -= 1;
        evicted.push(note.id.clone());
    }
    Ok(evicted)
}

fn json_array_len(item_bytes: usize, count: usize) -> usize {
    // brackets plus separating commas
    2 + item_bytes + count.saturating_sub(1)
}

pub(crate) fn encode_record<T: Serialize>(record: &T) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&RecordEnvelope::new(record))?)
}

pub(crate) fn decode_record<T: DeserializeOwned>(payload: &[u8]) -> Result<T, String> {
    if let Ok(envelope) = serde_json::from_slice::<RecordEnvelope<T>>(payload) {
        if envelope.format_version != RECORD_FORMAT_VERSION {
            return Err(format!(
                "unsupported record format version: {}",
                envelope.format_version
            ));
        }
        return Ok(envelope.record);
    }

    // Rows written before the envelope existed hold the bare record.
    serde_json::from_slice::<T>(payload).map_err(|e| format!("record payload decode failed: {e}"))
}
