//! Sync event stream payloads.

use crate::types::{NoteId, QueueItemId};

/// Events emitted from the sync manager loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A mutation was appended to the queue.
    Enqueued {
        /// Queue item id.
        id: QueueItemId,
        /// Target note.
        note_id: NoteId,
    },
    /// The server confirmed a mutation and it left the queue.
    ItemSynced {
        /// Queue item id.
        id: QueueItemId,
        /// Target note.
        note_id: NoteId,
    },
    /// A replay attempt failed; the item stays queued as failed.
    ItemFailed {
        /// Queue item id.
        id: QueueItemId,
        /// Target note.
        note_id: NoteId,
        /// Server or transport message.
        error: String,
    },
    /// The server assigned its own id to a locally created note.
    NoteIdAssigned {
        /// Client-generated id.
        local_id: NoteId,
        /// Server id.
        remote_id: NoteId,
    },
    /// A newer server copy replaced local state.
    ConflictResolved {
        /// Affected note.
        note_id: NoteId,
        /// Stale queued mutations that were dropped.
        dropped: usize,
    },
    /// A drain pass finished.
    Drained {
        /// Mutations confirmed in this pass.
        synced: usize,
        /// Mutations that failed in this pass.
        failed: usize,
    },
    /// Connectivity changed.
    OnlineChanged {
        /// New state.
        online: bool,
    },
}
