//! Shared primitive IDs, timestamps, and status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable note identifier (server id once synced, client-generated before).
pub type NoteId = String;
/// Unique mutation queue entry identifier.
pub type QueueItemId = String;
/// Owning user identifier supplied by the auth layer.
pub type UserId = String;
/// UTC instant used for `updatedAt` and `clientUpdatedAt`.
pub type Timestamp = DateTime<Utc>;

/// Sync state of a cached note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoteSyncStatus {
    /// Local changes not yet confirmed by the server.
    #[default]
    Pending,
    /// Matches the last server-confirmed state.
    Synced,
}

/// Kind of mutation to replay against the remote note service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    /// Create a new note.
    Create,
    /// Overwrite fields of an existing note.
    Update,
    /// Delete a note.
    Delete,
}

/// Lifecycle state of a mutation queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Waiting to be replayed.
    #[default]
    Pending,
    /// Last replay attempt failed; needs explicit reset to retry.
    Failed,
    /// Confirmed by the server, about to be removed.
    Synced,
}

impl MutationStatus {
    /// Value stored in the indexed `status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Synced => "synced",
        }
    }
}
