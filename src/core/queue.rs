use std::sync::Arc;

use crate::{
    core::compact::compact_queue,
    op::{MutationInput, MutationQueueItem},
    persist::{PersistResult, StorageAdapter},
    types::{MutationStatus, QueueItemId, Timestamp},
};

/// Batch size used when callers do not pick one.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Owns the durable mutation log.
#[derive(Clone)]
pub struct OfflineQueueService {
    storage: Arc<dyn StorageAdapter>,
}

impl OfflineQueueService {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Appends one mutation, filling in id, status, and attempts defaults.
    pub fn enqueue(&self, input: MutationInput) -> PersistResult<MutationQueueItem> {
        let item = input.into_item();
        self.storage.upsert_queue_item(&item)?;
        tracing::debug!(id = %item.id, note_id = %item.note_id, op = ?item.operation, "enqueued mutation");
        Ok(item)
    }

    /// Replaces the whole queue with `inputs`.
    ///
    /// Use [`Self::enqueue`] in a loop for append semantics.
    pub fn enqueue_many(&self, inputs: Vec<MutationInput>) -> PersistResult<Vec<MutationQueueItem>> {
        let items: Vec<MutationQueueItem> = inputs.into_iter().map(MutationInput::into_item).collect();
        self.storage.upsert_queue(&items)?;
        Ok(items)
    }

    pub fn get_queue(&self) -> PersistResult<Vec<MutationQueueItem>> {
        self.storage.get_queue()
    }

    /// Replace-all write of a precomputed queue.
    pub fn upsert_queue(&self, items: &[MutationQueueItem]) -> PersistResult<()> {
        self.storage.upsert_queue(items)
    }

    /// Up to `size` pending items in replay order, left in place.
    pub fn get_pending_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        self.storage.get_pending_batch(size)
    }

    /// Deletes items after the server confirmed them.
    pub fn remove_items(&self, ids: &[QueueItemId]) -> PersistResult<()> {
        self.storage.remove_queue_items(ids)
    }

    pub fn mark_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<&str>,
    ) -> PersistResult<()> {
        self.storage.mark_queue_item_status(id, status, last_error)
    }

    /// Removes items before their outcome is known.
    #[deprecated(note = "use get_pending_batch and remove_items after confirmed success")]
    pub fn pop_batch(&self, size: usize) -> PersistResult<Vec<MutationQueueItem>> {
        self.storage.pop_queue_batch(size)
    }

    /// Marks `item` failed with `message` and bumps its attempt counter.
    pub fn record_failure(&self, item: &MutationQueueItem, message: &str) -> PersistResult<()> {
        let mut failed = item.clone();
        failed.status = MutationStatus::Failed;
        failed.attempts = failed.attempts.saturating_add(1);
        failed.last_error = Some(message.to_string());
        self.storage.upsert_queue_item(&failed)
    }

    /// Resets failed items with fewer than `max_attempts` attempts to pending.
    pub fn retry_failed(&self, max_attempts: u32) -> PersistResult<usize> {
        let mut reset = 0;
        for item in self.storage.get_queue()? {
            if item.status == MutationStatus::Failed && item.attempts < max_attempts {
                self.storage.upsert_queue_item(&MutationQueueItem {
                    status: MutationStatus::Pending,
                    ..item
                })?;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::debug!(reset, max_attempts, "reset failed mutations for retry");
        }
        Ok(reset)
    }

    /// Drops mutations for `note_id` produced before `before`.
    pub fn drop_superseded(&self, note_id: &str, before: Timestamp) -> PersistResult<usize> {
        let stale: Vec<QueueItemId> = self
            .storage
            .get_queue()?
            .into_iter()
            .filter(|item| item.note_id == note_id && item.client_updated_at < before)
            .map(|item| item.id)
            .collect();
        self.storage.remove_queue_items(&stale)?;
        Ok(stale.len())
    }

    /// Points every queued mutation for `from` at `to` once the server
    /// assigned a new id to a locally created note.
    pub fn retarget_note(&self, from: &str, to: &str) -> PersistResult<usize> {
        let mut moved = 0;
        for mut item in self.storage.get_queue()? {
            if item.note_id == from {
                item.note_id = to.to_string();
                self.storage.upsert_queue_item(&item)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// True when a pending mutation other than `except` targets `note_id`.
    pub fn has_pending_for(&self, note_id: &str, except: &str) -> PersistResult<bool> {
        Ok(self.storage.get_queue()?.iter().any(|item| {
            item.note_id == note_id && item.id != except && item.status == MutationStatus::Pending
        }))
    }

    /// Newest client time among unconfirmed mutations for `note_id`.
    pub fn latest_unsynced_at(&self, note_id: &str) -> PersistResult<Option<Timestamp>> {
        Ok(self
            .storage
            .get_queue()?
            .iter()
            .filter(|item| item.note_id == note_id && item.status != MutationStatus::Synced)
            .map(|item| item.client_updated_at)
            .max())
    }

    /// Collapses pending mutations per note; failed items are left untouched.
    ///
    /// Returns how many queue entries were removed.
    pub fn compact(&self) -> PersistResult<usize> {
        let queue = self.storage.get_queue()?;
        let (pending, mut kept): (Vec<_>, Vec<_>) = queue
            .into_iter()
            .partition(|item| item.status == MutationStatus::Pending);

        let compacted = compact_queue(&pending);
        let removed = pending.len() - compacted.len();
        if removed == 0 && compacted.iter().all(|item| pending.contains(item)) {
            return Ok(0);
        }

        kept.extend(compacted);
        self.storage.upsert_queue(&kept)?;
        tracing::debug!(removed, "compacted mutation queue");
        Ok(removed)
    }
}
