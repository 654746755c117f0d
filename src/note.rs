//! Cached note record and sparse note payload types.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::{MutationOperation, NoteId, NoteSyncStatus, Timestamp, UserId};

/// Local snapshot of one note, scoped to exactly one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedNote {
    /// Stable note identifier.
    pub id: NoteId,
    /// Owning user.
    pub user_id: UserId,
    /// Note title.
    pub title: String,
    /// Plain description.
    pub description: String,
    /// Ordered tag list; semantically a set.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque rich-text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Local sync state.
    pub status: NoteSyncStatus,
    /// Last mutation time; authoritative once confirmed by the server.
    pub updated_at: Timestamp,
    /// Local operations awaiting confirmation.
    #[serde(default)]
    pub pending_ops: Vec<MutationOperation>,
    /// Tombstone left by an optimistic delete until the server confirms it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl CachedNote {
    /// Builds a synced snapshot, as produced by hydration from the server.
    pub fn synced(
        id: impl Into<NoteId>,
        user_id: impl Into<UserId>,
        title: impl Into<String>,
        updated_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            title: title.into(),
            description: String::new(),
            tags: Vec::new(),
            content: None,
            status: NoteSyncStatus::Synced,
            updated_at,
            pending_ops: Vec::new(),
            deleted: false,
        }
    }

    /// Marker for a note deleted locally at `at`.
    pub fn tombstone(id: impl Into<NoteId>, user_id: impl Into<UserId>, at: Timestamp) -> Self {
        let mut note = Self::synced(id, user_id, String::new(), at);
        note.deleted = true;
        note.touch_pending(MutationOperation::Delete, at);
        note
    }

    /// Flags a local edit: status becomes pending and `op` is recorded.
    pub fn touch_pending(&mut self, op: MutationOperation, at: Timestamp) {
        self.status = NoteSyncStatus::Pending;
        self.updated_at = at;
        self.pending_ops.push(op);
    }

    /// Clears pending markers after the server confirmed `updated_at`.
    pub fn mark_synced(&mut self, updated_at: Timestamp) {
        self.status = NoteSyncStatus::Synced;
        self.updated_at = updated_at;
        self.pending_ops.clear();
    }

    /// Full-field payload used for create and update mutations.
    pub fn to_payload(&self) -> NotePayload {
        NotePayload {
            user_id: Some(self.user_id.clone()),
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            tags: Some(self.tags.clone()),
            content: self.content.clone(),
        }
    }
}

/// Overlays cached notes on the server list.
///
/// A cached copy replaces the server copy with the same id and tombstones
/// hide the note altogether. The result is ordered newest first, ties by id.
pub fn apply_overlay(server: Vec<CachedNote>, offline: &[CachedNote]) -> Vec<CachedNote> {
    let mut merged: HashMap<NoteId, CachedNote> =
        server.into_iter().map(|note| (note.id.clone(), note)).collect();
    for note in offline {
        if note.deleted {
            merged.remove(&note.id);
        } else {
            merged.insert(note.id.clone(), note.clone());
        }
    }

    let mut out: Vec<CachedNote> = merged.into_values().collect();
    out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    out
}

/// Sparse note where each `Some` field overwrites the record value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    /// Owning user, required by the remote create call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Optional replacement title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Optional replacement description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional replacement tag list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Optional replacement body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NotePayload {
    /// Returns true when no fields are set (the delete payload).
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlays the fields set in `later` onto `self`.
    pub fn merge_from(&mut self, later: &NotePayload) {
        if later.user_id.is_some() {
            self.user_id.clone_from(&later.user_id);
        }
        if later.title.is_some() {
            self.title.clone_from(&later.title);
        }
        if later.description.is_some() {
            self.description.clone_from(&later.description);
        }
        if later.tags.is_some() {
            self.tags.clone_from(&later.tags);
        }
        if later.content.is_some() {
            self.content.clone_from(&later.content);
        }
    }

    /// Applies this payload in place to `note`.
    pub fn apply_to(&self, note: &mut CachedNote) {
        if let Some(v) = &self.user_id {
            note.user_id = v.clone();
        }
        if let Some(v) = &self.title {
            note.title = v.clone();
        }
        if let Some(v) = &self.description {
            note.description = v.clone();
        }
        if let Some(v) = &self.tags {
            note.tags = v.clone();
        }
        if let Some(v) = &self.content {
            note.content = Some(v.clone());
        }
    }
}
