//! Remote note service and network status ports.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

use crate::{
    note::{CachedNote, NotePayload},
    types::{NoteId, NoteSyncStatus, Timestamp, UserId},
};

/// Server-confirmed note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNote {
    /// Server id.
    pub id: NoteId,
    /// Owning user.
    pub user_id: UserId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Tags.
    pub tags: Vec<String>,
    /// Rich-text body.
    pub content: Option<String>,
    /// Authoritative modification time.
    pub updated_at: Timestamp,
}

impl RemoteNote {
    /// Synced cache snapshot of this note.
    pub fn to_cached(&self) -> CachedNote {
        CachedNote {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            content: self.content.clone(),
            status: NoteSyncStatus::Synced,
            updated_at: self.updated_at,
            pending_ops: Vec::new(),
            deleted: false,
        }
    }
}

/// Failure reported by the remote note service.
///
/// `Display` is the server message verbatim; it is stored as `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Transport failure or timeout.
    #[error("{0}")]
    Unavailable(String),
    /// The server refused the mutation.
    #[error("{0}")]
    Rejected(String),
    /// The target note does not exist on the server.
    #[error("{0}")]
    NotFound(String),
}

/// Network side of the sync loop.
pub trait RemoteNoteService: Send + Sync + 'static {
    /// Creates a note; the server may assign a different id than `note_id`.
    fn create(
        &self,
        note_id: &str,
        payload: &NotePayload,
    ) -> impl Future<Output = Result<RemoteNote, RemoteError>> + Send;

    /// Overwrites the fields present in `payload`.
    fn update(
        &self,
        note_id: &str,
        payload: &NotePayload,
    ) -> impl Future<Output = Result<RemoteNote, RemoteError>> + Send;

    /// Deletes a note.
    fn delete(&self, note_id: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// Shared online/offline flag.
///
/// [`Self::subscribe`] hands out a receiver that observes every flip;
/// dropping the receiver unsubscribes.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publishes a connectivity change; repeated values are not re-announced.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}
