//! Flat key-value fallback storage.
//!
//! Each table is one JSON array under a fixed key. Reads are linear scans;
//! every operation holds the backend lock from first read to last write.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Mutex,
};

use hashbrown::{HashMap, HashSet};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    note::CachedNote,
    op::MutationQueueItem,
    types::{MutationStatus, QueueItemId, Timestamp},
};

use super::{
    LoadParams, OFFLINE_CACHE_LIMIT_BYTES, PersistError, PersistResult, StorageAdapter,
    plan_eviction,
};

const NOTES_KEY: &str = "offline_notes";
const QUEUE_KEY: &str = "offline_queue";

/// Minimal string key-value store.
pub trait KeyValueBackend: Send {
    /// Reads a value.
    fn get(&self, key: &str) -> PersistResult<Option<String>>;
    /// Writes a value.
    fn set(&mut self, key: &str, value: &str) -> PersistResult<()>;
    /// Removes a value; no-op when absent.
    fn remove(&mut self, key: &str) -> PersistResult<()>;
}

/// Volatile backend held in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: HashMap<String, String>,
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> PersistResult<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> PersistResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PersistResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Uses `dir`, creating it when missing.
    pub fn open(dir: impl AsRef<Path>) -> PersistResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        if !dir.is_dir() {
            return Err(PersistError::Message(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> PersistResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> PersistResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> PersistResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Key-value implementation of [`StorageAdapter`].
pub struct KvStorage<B> {
    backend: Mutex<B>,
    limit_bytes: usize,
}

impl<B: KeyValueBackend> KvStorage<B> {
    /// Wraps `backend` with the default byte budget.
    pub fn new(backend: B) -> Self {
        Self {
            backend: Mutex::new(backend),
            limit_bytes: OFFLINE_CACHE_LIMIT_BYTES,
        }
    }

    /// Overrides the byte budget used by `enforce_limit`.
    pub fn with_limit_bytes(mut self, limit_bytes: usize) -> Self {
        self.limit_bytes = limit_bytes;
        self
    }

    fn with_backend<T>(&self, f: impl FnOnce(&mut B) -> PersistResult<T>) -> PersistResult<T> {
        let mut guard = self.backend.lock().map_err(|_| PersistError::LockPoisoned)?;
        f(&mut guard)
    }
}

impl<B: KeyValueBackend> StorageAdapter for KvStorage<B> {
    fn load_notes(&self, params: LoadParams) -> PersistResult<Vec<CachedNote>> {
        self.with_backend(|b| {
            let notes: Vec<CachedNote> = read_table(&*b, NOTES_KEY)?;
            let start = params.offset.unwrap_or(0);
            let take = params.limit.unwrap_or(usize::MAX);
            Ok(notes.into_iter().skip(start).take(take).collect())
        })
    }

    fn save_note(&self, note: &CachedNote) -> PersistResult<()> {
        self.save_notes(std::slice::from_ref(note))
    }

    fn save_notes(&self, new_notes: &[CachedNote]) -> PersistResult<()> {
        if new_notes.is_empty() {
            return Ok(());
        }
        self.with_backend(|b| {
            let mut notes: Vec<CachedNote> = read_table(&*b, NOTES_KEY)?;
            let mut pos: HashMap<String, usize> = notes
                .iter()
                .enumerate()
                .map(|(idx, n)| (n.id.clone(), idx))
                .collect();
            for note in new_notes {
                match pos.get(&note.id) {
                    Some(&idx) => notes[idx] = note.clone(),
                    None => {
                        pos.insert(note.id.clone(), notes.len());
                        notes.push(note.clone());
                    }
                }
            }
            write_table(b, NOTES_KEY, &notes)
        })
    }

    fn delete_note(&self, id: &str) -> PersistResult<()> {
        self.with_backend(|b| {
            let mut notes: Vec<CachedNote> = read_table(&*b, NOTES_KEY)?;
            let before = notes.len();
            notes.retain(|n| n.id != id);
            if notes.len() == before {
                return Ok(());
            }
            write_table(b, NOTES_KEY, &notes)
        })
    }

    fn mark_synced(&self, id: &str, updated_at: Timestamp) -> PersistResult<()> {
        self.with_backend(|b| {
            let mut notes: Vec<CachedNote> = read_table(&*b, NOTES_KEY)?;
            let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
                return Ok(());
            };
            note.mark_synced(updated_at);
            write_table(b, NOTES_KEY, &notes)
        })
    }

    fn get_queue(&self) -> PersistResult<Vec<MutationQueueItem>> {
        self.with_backend(|b| read_table(&*b, QUEUE_KEY))
    }

    fn upsert_queue_item(&self, item: &MutationQueueItem) -> PersistResult<()> {
        self.with_backend(|b| {
            let mut queue: Vec<MutationQueueItem> = read_table(&*b, QUEUE_KEY)?;
            match queue.iter_mut().find(|q| q.id == item.id) {
                Some(existing) => *existing = item.clone(),
                None => queue.push(item.clone()),
            }
            write_table(b, QUEUE_KEY, &queue)
        })
    }

    fn upsert_queue(&self, items: &[MutationQueueItem]) -> PersistResult<()> {
        self.with_backend(|b| write_table(b, QUEUE_KEY, items))
    }

    fn get_pending_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        self.with_backend(|b| {
            let mut pending: Vec<MutationQueueItem> = read_table::<MutationQueueItem>(&*b, QUEUE_KEY)?
                .into_iter()
                .filter(|item| item.status == MutationStatus::Pending)
                .collect();
            pending.sort_by(MutationQueueItem::replay_cmp);
            pending.truncate(size);
            Ok(pending)
        })
    }

    fn pop_queue_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.with_backend(|b| {
            let mut queue: Vec<MutationQueueItem> = read_table(&*b, QUEUE_KEY)?;
            let mut ordered = queue.clone();
            ordered.sort_by(MutationQueueItem::replay_cmp);
            ordered.truncate(size);
            if ordered.is_empty() {
                return Ok(ordered);
            }

            let taken: HashSet<String> = ordered.iter().map(|item| item.id.clone()).collect();
            queue.retain(|item| !taken.contains(&item.id));
            write_table(b, QUEUE_KEY, &queue)?;
            Ok(ordered)
        })
    }

    fn remove_queue_items(&self, ids: &[QueueItemId]) -> PersistResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.with_backend(|b| {
            let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
            let mut queue: Vec<MutationQueueItem> = read_table(&*b, QUEUE_KEY)?;
            let before = queue.len();
            queue.retain(|item| !doomed.contains(item.id.as_str()));
            if queue.len() == before {
                return Ok(());
            }
            write_table(b, QUEUE_KEY, &queue)
        })
    }

    fn mark_queue_item_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<&str>,
    ) -> PersistResult<()> {
        self.with_backend(|b| {
            let mut queue: Vec<MutationQueueItem> = read_table(&*b, QUEUE_KEY)?;
            let Some(item) = queue.iter_mut().find(|q| q.id == id) else {
                return Ok(());
            };
            item.status = status;
            item.last_error = last_error.map(str::to_string);
            write_table(b, QUEUE_KEY, &queue)
        })
    }

    fn enforce_limit(&self) -> PersistResult<usize> {
        let limit = self.limit_bytes;
        self.with_backend(|b| {
            let mut notes: Vec<CachedNote> = read_table(&*b, NOTES_KEY)?;
            let queue: Vec<MutationQueueItem> = read_table(&*b, QUEUE_KEY)?;
            let evicted = plan_eviction(&notes, &queue, limit)?;
            if evicted.is_empty() {
                return Ok(0);
            }

            let doomed: HashSet<&str> = evicted.iter().map(String::as_str).collect();
            notes.retain(|n| !doomed.contains(n.id.as_str()));
            write_table(b, NOTES_KEY, &notes)?;
            tracing::info!(evicted = evicted.len(), limit, "evicted cached notes over budget");
            Ok(evicted.len())
        })
    }

    fn clear_all(&self) -> PersistResult<()> {
        self.with_backend(|b| {
            b.remove(NOTES_KEY)?;
            b.remove(QUEUE_KEY)
        })
    }

    fn limit_bytes(&self) -> usize {
        self.limit_bytes
    }
}

fn read_table<T: DeserializeOwned>(backend: &impl KeyValueBackend, key: &str) -> PersistResult<Vec<T>> {
    let Some(raw) = backend.get(key)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(rows) => Ok(rows),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding unreadable offline table");
            Ok(Vec::new())
        }
    }
}

fn write_table<T: Serialize>(backend: &mut impl KeyValueBackend, key: &str, rows: &[T]) -> PersistResult<()> {
    let raw = serde_json::to_string(rows)?;
    backend.set(key, &raw)
}
