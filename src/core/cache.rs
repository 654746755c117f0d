use std::sync::Arc;

use crate::{
    note::{CachedNote, apply_overlay},
    persist::{LoadParams, PersistResult, StorageAdapter},
    types::Timestamp,
};

/// Owns the local note snapshot.
///
/// Callers set `status` before saving: optimistic edits save `Pending`,
/// hydration from the server saves `Synced`.
#[derive(Clone)]
pub struct OfflineCacheService {
    storage: Arc<dyn StorageAdapter>,
}

impl OfflineCacheService {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    pub fn load_notes(&self, params: LoadParams) -> PersistResult<Vec<CachedNote>> {
        self.storage.load_notes(params)
    }

    /// Notes owned by `user_id`, most recently updated first.
    ///
    /// Tombstones are included; [`Self::overlay_user_notes`] hides them.
    pub fn load_user_notes(&self, user_id: &str) -> PersistResult<Vec<CachedNote>> {
        let mut notes: Vec<CachedNote> = self
            .storage
            .load_notes(LoadParams::all())?
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    /// Server list for `user_id` with cached copies and tombstones applied.
    pub fn overlay_user_notes(
        &self,
        user_id: &str,
        server: Vec<CachedNote>,
    ) -> PersistResult<Vec<CachedNote>> {
        let offline: Vec<CachedNote> = self
            .storage
            .load_notes(LoadParams::all())?
            .into_iter()
            .filter(|n| n.user_id == user_id || n.deleted)
            .collect();
        Ok(apply_overlay(server, &offline))
    }

    pub fn get_note(&self, id: &str) -> PersistResult<Option<CachedNote>> {
        Ok(self
            .storage
            .load_notes(LoadParams::all())?
            .into_iter()
            .find(|n| n.id == id))
    }

    /// Upserts `note`, then trims the cache back under budget.
    pub fn save_note(&self, note: &CachedNote) -> PersistResult<()> {
        self.storage.save_note(note)?;
        self.enforce_limit()?;
        Ok(())
    }

    pub fn save_notes(&self, notes: &[CachedNote]) -> PersistResult<()> {
        self.storage.save_notes(notes)?;
        self.enforce_limit()?;
        Ok(())
    }

    /// Removes the cached row, tombstone included; the caller owns the queue.
    pub fn delete_note(&self, id: &str) -> PersistResult<()> {
        self.storage.delete_note(id)
    }

    /// The only transition from `Pending` back to `Synced`.
    pub fn mark_synced(&self, id: &str, updated_at: Timestamp) -> PersistResult<()> {
        self.storage.mark_synced(id, updated_at)
    }

    /// Evicts oldest notes while over budget; returns how many were evicted.
    pub fn enforce_limit(&self) -> PersistResult<usize> {
        self.storage.enforce_limit()
    }

    pub fn cache_limit_bytes(&self) -> usize {
        self.storage.limit_bytes()
    }

    /// Purges notes and queue; called on sign-out.
    pub fn clear_all(&self) -> PersistResult<()> {
        tracing::info!("clearing offline cache and queue");
        self.storage.clear_all()
    }
}
