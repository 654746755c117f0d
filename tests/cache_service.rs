use std::sync::Arc;

use chrono::{TimeZone, Utc};

use notesync::{
    core::cache::OfflineCacheService,
    note::{CachedNote, apply_overlay},
    op::MutationInput,
    persist::{
        LoadParams, OFFLINE_CACHE_LIMIT_BYTES, StorageAdapter, StorageConfig, open_storage,
        serialized_size, sqlite::SqliteStorage,
    },
    types::{MutationOperation, NoteSyncStatus, Timestamp},
};

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
}

fn note(id: &str, user: &str, secs: i64) -> CachedNote {
    CachedNote::synced(id, user, format!("title {id}"), ts(secs))
}

#[test]
fn user_notes_are_filtered_and_newest_first() {
    let cache = OfflineCacheService::new(Arc::new(SqliteStorage::open_in_memory()));
    cache
        .save_notes(&[note("a", "u1", 1), note("b", "u2", 2), note("c", "u1", 3)])
        .expect("save");

    let mine = cache.load_user_notes("u1").expect("load");
    let ids: Vec<&str> = mine.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["c", "a"]);
    assert!(cache.load_user_notes("nobody").expect("load").is_empty());
}

#[test]
fn get_note_and_mark_synced() {
    let cache = OfflineCacheService::new(Arc::new(SqliteStorage::open_in_memory()));
    let mut n = note("a", "u1", 1);
    n.touch_pending(MutationOperation::Update, ts(4));
    cache.save_note(&n).expect("save");

    let stored = cache.get_note("a").expect("get").expect("cached");
    assert_eq!(stored.status, NoteSyncStatus::Pending);
    assert_eq!(stored.pending_ops, vec![MutationOperation::Update]);

    cache.mark_synced("a", ts(9)).expect("mark");
    let synced = cache.get_note("a").expect("get").expect("cached");
    assert_eq!(synced.status, NoteSyncStatus::Synced);
    assert_eq!(synced.updated_at, ts(9));
    assert!(cache.get_note("missing").expect("get").is_none());
}

#[test]
fn saving_over_budget_evicts_oldest_notes() {
    let notes: Vec<CachedNote> = (1..=4).map(|i| note(&format!("n{i}"), "u1", i)).collect();
    let limit = serialized_size(&notes[1..], &[]).expect("size");
    let storage = Arc::new(SqliteStorage::open_in_memory().with_limit_bytes(limit));
    let cache = OfflineCacheService::new(storage);
    assert_eq!(cache.cache_limit_bytes(), limit);

    for n in &notes {
        cache.save_note(n).expect("save");
    }

    let mut left: Vec<String> = cache
        .load_notes(LoadParams::all())
        .expect("load")
        .into_iter()
        .map(|n| n.id)
        .collect();
    left.sort();
    assert_eq!(left, ["n2", "n3", "n4"]);
    assert_eq!(cache.enforce_limit().expect("enforce"), 0);
}

#[test]
fn clear_all_purges_notes_and_queue() {
    let storage: Arc<dyn StorageAdapter> = Arc::new(SqliteStorage::open_in_memory());
    let cache = OfflineCacheService::new(Arc::clone(&storage));
    cache.save_note(&note("a", "u1", 1)).expect("save");
    storage
        .upsert_queue_item(
            &MutationInput::new("a", MutationOperation::Delete, Default::default(), ts(2))
                .into_item(),
        )
        .expect("queue");

    cache.clear_all().expect("clear");
    assert!(cache.load_notes(LoadParams::all()).expect("load").is_empty());
    assert!(storage.get_queue().expect("queue").is_empty());
}

#[test]
fn open_storage_falls_back_to_key_value_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig {
        force_fallback: true,
        fallback_dir: Some(dir.path().to_path_buf()),
        cache_limit_bytes: 4096,
        ..StorageConfig::default()
    };

    let storage = open_storage(&config);
    assert_eq!(storage.limit_bytes(), 4096);
    storage.save_note(&note("a", "u1", 1)).expect("save");
    assert!(dir.path().join("offline_notes.json").exists());
}

#[test]
fn open_storage_prefers_sqlite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StorageConfig {
        sqlite_path: Some(dir.path().join("offline.db")),
        fallback_dir: Some(dir.path().join("kv")),
        ..StorageConfig::default()
    };

    let storage = open_storage(&config);
    assert_eq!(storage.limit_bytes(), OFFLINE_CACHE_LIMIT_BYTES);
    storage.save_note(&note("a", "u1", 1)).expect("save");
    assert!(dir.path().join("offline.db").exists());
    assert!(!dir.path().join("kv").exists());
}

#[test]
fn storage_config_reads_partial_json() {
    let config: StorageConfig =
        serde_json::from_str(r#"{"cache_limit_bytes": 1024}"#).expect("parse config");
    assert_eq!(config.cache_limit_bytes, 1024);
    assert_eq!(config.sqlite_path, None);
    assert!(!config.force_fallback);
}

#[test]
fn tight_budget_keeps_only_the_newer_note() {
    let a = CachedNote::synced("a", "u1", "first", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let b = CachedNote::synced("b", "u1", "second", Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    let limit = serialized_size(std::slice::from_ref(&b), &[]).expect("size");
    let cache = OfflineCacheService::new(Arc::new(SqliteStorage::open_in_memory().with_limit_bytes(limit)));

    cache.save_notes(&[a, b.clone()]).expect("save");

    assert_eq!(cache.load_notes(LoadParams::all()).expect("load"), vec![b]);
}

#[test]
fn overlay_prefers_cached_copies_and_hides_tombstones() {
    let cache = OfflineCacheService::new(Arc::new(SqliteStorage::open_in_memory()));
    let mut edited = note("b", "u1", 5);
    edited.title = "local".to_string();
    edited.touch_pending(MutationOperation::Update, ts(5));
    cache
        .save_notes(&[
            CachedNote::tombstone("a", "u1", ts(6)),
            edited.clone(),
            note("d", "u1", 4),
            note("e", "u2", 9),
            // delete staged before the note was ever cached carries no owner
            CachedNote::tombstone("c", "", ts(7)),
        ])
        .expect("save");

    let server = vec![note("a", "u1", 1), note("b", "u1", 2), note("c", "u1", 3)];
    let visible = cache.overlay_user_notes("u1", server).expect("overlay");

    let ids: Vec<&str> = visible.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["b", "d"]);
    assert_eq!(visible[0], edited);
}

#[test]
fn overlay_orders_newest_first_with_id_tiebreak() {
    let server = vec![note("x", "u1", 1), note("b", "u1", 3), note("a", "u1", 3)];
    let offline = [note("y", "u1", 2)];

    let ids: Vec<String> = apply_overlay(server, &offline).into_iter().map(|n| n.id).collect();
    assert_eq!(ids, ["a", "b", "y", "x"]);
    assert!(apply_overlay(Vec::new(), &[CachedNote::tombstone("z", "u1", ts(1))]).is_empty());
}

#[test]
fn tombstone_flag_is_omitted_from_live_notes() {
    let live = serde_json::to_value(note("a", "u1", 1)).expect("encode");
    assert!(live.get("deleted").is_none());

    let gone = serde_json::to_value(CachedNote::tombstone("a", "u1", ts(1))).expect("encode");
    assert_eq!(gone["deleted"], serde_json::Value::Bool(true));
    let back: CachedNote = serde_json::from_value(gone).expect("decode");
    assert!(back.deleted);
}
