//! Optimistic local writes as stage, commit, and compensate phases.
//!
//! Staging applies a change to the cache and queues its intent, keeping the
//! prior snapshot. Commit folds the server's answer back into the cache.
//! Compensate restores the prior snapshot and withdraws the intent.

use hashbrown::HashSet;

use crate::{
    core::{cache::OfflineCacheService, queue::OfflineQueueService},
    note::{CachedNote, NotePayload},
    op::{MutationInput, MutationQueueItem},
    persist::{LoadParams, PersistError, PersistResult},
    types::{MutationOperation, MutationStatus, NoteId, Timestamp},
};

use super::remote::RemoteNote;

/// A local edit awaiting server confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    /// A new note; its status and timestamps are set while staging.
    Create(CachedNote),
    /// Field changes to a cached note.
    Update {
        /// Target note.
        note_id: NoteId,
        /// Fields to overwrite.
        payload: NotePayload,
    },
    /// Removal of a note.
    Delete {
        /// Target note.
        note_id: NoteId,
    },
}

/// Handle returned by [`OptimisticWriter::stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMutation {
    /// Queued intent.
    pub item: MutationQueueItem,
    /// Cache snapshot before staging; `None` when the note was not cached.
    pub previous: Option<CachedNote>,
}

/// Server id reassignment after a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdReassignment {
    /// Client-generated id.
    pub local_id: NoteId,
    /// Server id.
    pub remote_id: NoteId,
}

/// Runs the three optimistic phases over the cache and queue services.
#[derive(Clone)]
pub struct OptimisticWriter {
    cache: OfflineCacheService,
    queue: OfflineQueueService,
}

impl OptimisticWriter {
    pub fn new(cache: OfflineCacheService, queue: OfflineQueueService) -> Self {
        Self { cache, queue }
    }

    /// Applies `change` locally at `at` and enqueues the matching mutation.
    pub fn stage(&self, change: LocalChange, at: Timestamp) -> PersistResult<StagedMutation> {
        match change {
            LocalChange::Create(mut note) => {
                let previous = self.cache.get_note(&note.id)?;
                note.deleted = false;
                note.touch_pending(MutationOperation::Create, at);
                self.cache.save_note(&note)?;
                let item = self.queue.enqueue(MutationInput::new(
                    note.id.clone(),
                    MutationOperation::Create,
                    note.to_payload(),
                    at,
                ))?;
                Ok(StagedMutation { item, previous })
            }
            LocalChange::Update { note_id, payload } => {
                let previous = self
                    .cache
                    .get_note(&note_id)?
                    .ok_or_else(|| PersistError::Message(format!("note {note_id} is not cached")))?;
                if previous.deleted {
                    return Err(PersistError::Message(format!("note {note_id} is deleted")));
                }
                let mut note = previous.clone();
                payload.apply_to(&mut note);
                note.touch_pending(MutationOperation::Update, at);
                self.cache.save_note(&note)?;
                let item = self.queue.enqueue(MutationInput::new(
                    note_id,
                    MutationOperation::Update,
                    note.to_payload(),
                    at,
                ))?;
                Ok(StagedMutation {
                    item,
                    previous: Some(previous),
                })
            }
            LocalChange::Delete { note_id } => {
                let previous = self.cache.get_note(&note_id)?;
                let tombstone = match &previous {
                    Some(note) => {
                        let mut note = note.clone();
                        note.deleted = true;
                        note.touch_pending(MutationOperation::Delete, at);
                        note
                    }
                    None => CachedNote::tombstone(note_id.clone(), String::new(), at),
                };
                self.cache.save_note(&tombstone)?;
                let item = self.queue.enqueue(MutationInput::new(
                    note_id,
                    MutationOperation::Delete,
                    NotePayload::default(),
                    at,
                ))?;
                Ok(StagedMutation { item, previous })
            }
        }
    }

    /// Folds the server's answer for `staged` into local state.
    pub fn commit(
        &self,
        staged: &StagedMutation,
        confirmed: Option<&RemoteNote>,
    ) -> PersistResult<Option<IdReassignment>> {
        confirm_replayed(&self.cache, &self.queue, &staged.item, confirmed)
    }

    /// Restores the pre-stage snapshot and withdraws the queued intent.
    pub fn compensate(&self, staged: &StagedMutation) -> PersistResult<()> {
        match &staged.previous {
            Some(previous) => self.cache.save_note(previous)?,
            None => self.cache.delete_note(&staged.item.note_id)?,
        }
        self.queue.remove_items(std::slice::from_ref(&staged.item.id))?;
        tracing::debug!(id = %staged.item.id, note_id = %staged.item.note_id, "rolled back optimistic change");
        Ok(())
    }
}

/// Records a server-confirmed mutation: marks it synced, refreshes the
/// cached note from `confirmed` unless later local edits are still queued,
/// then removes the item. A confirmed delete drops the tombstone.
pub fn confirm_replayed(
    cache: &OfflineCacheService,
    queue: &OfflineQueueService,
    item: &MutationQueueItem,
    confirmed: Option<&RemoteNote>,
) -> PersistResult<Option<IdReassignment>> {
    queue.mark_status(&item.id, MutationStatus::Synced, None)?;

    let mut reassignment = None;
    if let Some(remote) = confirmed {
        if remote.id != item.note_id {
            if let Some(mut local) = cache.get_note(&item.note_id)? {
                cache.delete_note(&item.note_id)?;
                local.id = remote.id.clone();
                cache.save_note(&local)?;
            }
            queue.retarget_note(&item.note_id, &remote.id)?;
            reassignment = Some(IdReassignment {
                local_id: item.note_id.clone(),
                remote_id: remote.id.clone(),
            });
        }

        if !queue.has_pending_for(&remote.id, &item.id)? {
            cache.save_note(&remote.to_cached())?;
            cache.mark_synced(&remote.id, remote.updated_at)?;
        }
    }

    if item.operation == MutationOperation::Delete && !queue.has_pending_for(&item.note_id, &item.id)? {
        cache.delete_note(&item.note_id)?;
    }

    queue.remove_items(std::slice::from_ref(&item.id))?;
    Ok(reassignment)
}

/// Drops tombstones with no mutation left to confirm them, as after a
/// create and delete compacted away. Returns how many were removed.
pub fn sweep_tombstones(cache: &OfflineCacheService, queue: &OfflineQueueService) -> PersistResult<usize> {
    let queued: HashSet<NoteId> = queue
        .get_queue()?
        .into_iter()
        .filter(|item| item.status != MutationStatus::Synced)
        .map(|item| item.note_id)
        .collect();
    let mut swept = 0;
    for note in cache.load_notes(LoadParams::all())? {
        if note.deleted && !queued.contains(&note.id) {
            cache.delete_note(&note.id)?;
            swept += 1;
        }
    }
    if swept > 0 {
        tracing::debug!(swept, "removed tombstones with nothing left to sync");
    }
    Ok(swept)
}
