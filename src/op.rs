//! Mutation queue item model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    note::NotePayload,
    types::{MutationOperation, MutationStatus, NoteId, QueueItemId, Timestamp},
};

/// Version number for serialized [`RecordEnvelope`] payloads.
pub const RECORD_FORMAT_VERSION: u16 = 1;

/// One durable intent to mutate a note on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationQueueItem {
    /// Unique queue entry id.
    pub id: QueueItemId,
    /// Target note.
    pub note_id: NoteId,
    /// Operation to replay.
    pub operation: MutationOperation,
    /// Full note fields for create/update, empty for delete.
    pub payload: NotePayload,
    /// Local mutation time; replay ordering key.
    pub client_updated_at: Timestamp,
    /// Queue lifecycle state.
    pub status: MutationStatus,
    /// Replay attempts so far.
    #[serde(default)]
    pub attempts: u32,
    /// Last failure message, stored verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl MutationQueueItem {
    /// Replay order: `client_updated_at`, then `id` for equal instants.
    pub fn replay_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.client_updated_at
            .cmp(&other.client_updated_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Enqueue request; unset fields take queue defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationInput {
    /// Explicit queue id, generated when `None`.
    pub id: Option<QueueItemId>,
    /// Target note.
    pub note_id: NoteId,
    /// Operation to replay.
    pub operation: MutationOperation,
    /// Operation payload.
    pub payload: NotePayload,
    /// Local mutation time.
    pub client_updated_at: Timestamp,
    /// Initial status, `Pending` when `None`.
    pub status: Option<MutationStatus>,
    /// Initial attempt count, `0` when `None`.
    pub attempts: Option<u32>,
    /// Initial error text.
    pub last_error: Option<String>,
}

impl MutationInput {
    /// Input with only the required fields set.
    pub fn new(
        note_id: impl Into<NoteId>,
        operation: MutationOperation,
        payload: NotePayload,
        client_updated_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            note_id: note_id.into(),
            operation,
            payload,
            client_updated_at,
            status: None,
            attempts: None,
            last_error: None,
        }
    }

    /// Materializes a queue item, generating an id when none was given.
    pub fn into_item(self) -> MutationQueueItem {
        MutationQueueItem {
            id: self.id.unwrap_or_else(generate_queue_id),
            note_id: self.note_id,
            operation: self.operation,
            payload: self.payload,
            client_updated_at: self.client_updated_at,
            status: self.status.unwrap_or_default(),
            attempts: self.attempts.unwrap_or(0),
            last_error: self.last_error,
        }
    }
}

/// Fresh queue id, independent of the note id.
pub fn generate_queue_id() -> QueueItemId {
    format!("mq_{}", uuid::Uuid::new_v4())
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope<T> {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped record.
    pub record: T,
}

impl<T> RecordEnvelope<T> {
    /// Constructs an envelope using [`RECORD_FORMAT_VERSION`].
    pub fn new(record: T) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            record,
        }
    }
}
