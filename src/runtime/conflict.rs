//! Last-write-wins reconciliation of server notes against the local cache.

use crate::{
    core::{cache::OfflineCacheService, queue::OfflineQueueService},
    note::CachedNote,
    persist::PersistResult,
    types::Timestamp,
};

use super::remote::RemoteNote;

/// Which copy survives a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The local copy is as new or newer; nothing changes.
    KeepLocal,
    /// The server copy is newer than every local trace of the note and overwrites it.
    TakeRemote,
}

/// Result of reconciling one server note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictOutcome {
    /// Winning side.
    pub resolution: Resolution,
    /// Queued mutations dropped because the server copy superseded them.
    pub dropped: usize,
}

/// Whole-record comparison by `updated_at`; ties keep the local copy.
///
/// `queued_at` is the newest unconfirmed mutation for the note. It stands in
/// for the local copy when that was evicted, and tombstones carry their own
/// delete time.
pub fn resolve(
    local: Option<&CachedNote>,
    queued_at: Option<Timestamp>,
    remote: &RemoteNote,
) -> Resolution {
    let local_at = local.map(|note| note.updated_at).max(queued_at);
    match local_at {
        Some(at) if at >= remote.updated_at => Resolution::KeepLocal,
        _ => Resolution::TakeRemote,
    }
}

/// Applies `remote` to the cache when it wins and drops queued mutations
/// for that note produced before the server's timestamp.
pub fn apply_remote(
    cache: &OfflineCacheService,
    queue: &OfflineQueueService,
    remote: &RemoteNote,
) -> PersistResult<ConflictOutcome> {
    let local = cache.get_note(&remote.id)?;
    let queued_at = queue.latest_unsynced_at(&remote.id)?;
    let resolution = resolve(local.as_ref(), queued_at, remote);
    if resolution == Resolution::KeepLocal {
        return Ok(ConflictOutcome {
            resolution,
            dropped: 0,
        });
    }

    cache.save_note(&remote.to_cached())?;
    cache.mark_synced(&remote.id, remote.updated_at)?;
    let dropped = queue.drop_superseded(&remote.id, remote.updated_at)?;
    if dropped > 0 {
        tracing::info!(note_id = %remote.id, dropped, "server copy superseded queued mutations");
    }

    Ok(ConflictOutcome {
        resolution,
        dropped,
    })
}
