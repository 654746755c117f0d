use chrono::{TimeZone, Utc};
use hashbrown::HashSet;
use proptest::prelude::*;

use notesync::{
    core::compact::compact_queue,
    note::{CachedNote, NotePayload, apply_overlay},
    op::{MutationInput, MutationQueueItem},
    persist::{
        LoadParams, StorageAdapter,
        kv::{KvStorage, MemoryBackend},
        serialized_size,
        sqlite::SqliteStorage,
    },
    types::{MutationOperation, MutationStatus, Timestamp},
};

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("timestamp")
}

// Mostly near-present times, plus instants before 1677 and after 2262.
fn secs_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        4 => 0i64..40,
        1 => -12_000_000_000i64..-11_999_999_980,
        1 => 9_000_000_000i64..9_000_000_020,
    ]
}

#[derive(Debug, Clone)]
struct Seed {
    note: u8,
    op: u8,
    status: u8,
    secs: i64,
}

fn seed_strategy() -> impl Strategy<Value = Seed> {
    (0u8..6, 0u8..3, 0u8..3, secs_strategy()).prop_map(|(note, op, status, secs)| Seed {
        note,
        op,
        status,
        secs,
    })
}

fn materialize(seeds: &[Seed]) -> Vec<MutationQueueItem> {
    seeds
        .iter()
        .enumerate()
        .map(|(idx, s)| {
            let operation = match s.op {
                0 => MutationOperation::Create,
                1 => MutationOperation::Update,
                _ => MutationOperation::Delete,
            };
            let status = match s.status {
                0 => MutationStatus::Pending,
                1 => MutationStatus::Failed,
                _ => MutationStatus::Synced,
            };
            MutationInput {
                id: Some(format!("q{idx:03}")),
                status: Some(status),
                ..MutationInput::new(
                    format!("n{}", s.note),
                    operation,
                    NotePayload {
                        title: Some(format!("t{idx}")),
                        ..NotePayload::default()
                    },
                    ts(s.secs),
                )
            }
            .into_item()
        })
        .collect()
}

fn expected_batch(items: &[MutationQueueItem], size: usize) -> Vec<MutationQueueItem> {
    let mut pending: Vec<MutationQueueItem> = items
        .iter()
        .filter(|item| item.status == MutationStatus::Pending)
        .cloned()
        .collect();
    pending.sort_by(MutationQueueItem::replay_cmp);
    pending.truncate(size);
    pending
}

fn backends() -> Vec<Box<dyn StorageAdapter>> {
    vec![
        Box::new(SqliteStorage::open_in_memory()),
        Box::new(KvStorage::new(MemoryBackend::default())),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pending_batch_matches_reference_on_every_backend(
        seeds in prop::collection::vec(seed_strategy(), 0..40),
        size in 0usize..15,
    ) {
        let items = materialize(&seeds);
        let expected = expected_batch(&items, size);

        for storage in backends() {
            storage.upsert_queue(&items).expect("seed queue");
            let batch = storage.get_pending_batch(size).expect("batch");
            prop_assert!(batch.len() <= size);
            prop_assert_eq!(&batch, &expected);
            prop_assert_eq!(storage.get_queue().expect("queue").len(), items.len());
        }
    }

    #[test]
    fn enforce_limit_fits_budget_without_touching_queue(
        seeds in prop::collection::vec(seed_strategy(), 0..12),
        note_ages in prop::collection::vec(0u16..500, 0..20),
        limit in 0usize..4096,
    ) {
        let queue = materialize(&seeds);
        let notes: Vec<CachedNote> = note_ages
            .iter()
            .enumerate()
            .map(|(idx, age)| CachedNote::synced(format!("note-{idx}"), "u1", "x".repeat(idx * 7), ts(i64::from(*age))))
            .collect();

        let storage = SqliteStorage::open_in_memory().with_limit_bytes(limit);
        storage.upsert_queue(&queue).expect("queue");
        storage.save_notes(&notes).expect("notes");

        let evicted = storage.enforce_limit().expect("enforce");
        let left = storage.load_notes(LoadParams::all()).expect("load");
        prop_assert_eq!(left.len() + evicted, notes.len());
        prop_assert_eq!(storage.get_queue().expect("queue").len(), queue.len());

        let size = serialized_size(&left, &queue).expect("size");
        prop_assert!(size <= limit || left.is_empty());

        // survivors are never older than anything evicted
        let kept: HashSet<&str> = left.iter().map(|n| n.id.as_str()).collect();
        let oldest_kept = left.iter().map(|n| (n.updated_at, n.id.clone())).min();
        let newest_evicted = notes
            .iter()
            .filter(|n| !kept.contains(n.id.as_str()))
            .map(|n| (n.updated_at, n.id.clone()))
            .max();
        if let (Some(kept), Some(evicted)) = (oldest_kept, newest_evicted) {
            prop_assert!(evicted < kept);
        }
    }

    #[test]
    fn compaction_leaves_at_most_one_pending_item_per_note(
        seeds in prop::collection::vec(seed_strategy(), 0..40),
    ) {
        let items = materialize(&seeds);
        let out = compact_queue(&items);

        let mut notes = HashSet::new();
        for item in &out {
            prop_assert!(notes.insert(item.note_id.clone()), "duplicate note {}", item.note_id);
            prop_assert_eq!(item.status, MutationStatus::Pending);
            prop_assert!(items.iter().any(|orig| orig.id == item.id));
        }
        for pair in out.windows(2) {
            prop_assert!(pair[0].replay_cmp(&pair[1]).is_lt());
        }
        prop_assert!(out.len() <= items.len());
    }

    #[test]
    fn overlay_hides_tombstones_and_prefers_cached_copies(
        server_ids in prop::collection::vec(0u8..10, 0..10),
        offline in prop::collection::vec((0u8..10, any::<bool>(), secs_strategy()), 0..10),
    ) {
        let server: Vec<CachedNote> = server_ids
            .iter()
            .map(|id| CachedNote::synced(format!("n{id}"), "u1", "server", ts(i64::from(*id))))
            .collect();
        let mut cached: Vec<CachedNote> = Vec::new();
        for (id, deleted, secs) in &offline {
            let id = format!("n{id}");
            if cached.iter().any(|n| n.id == id) {
                continue;
            }
            cached.push(if *deleted {
                CachedNote::tombstone(id, "u1", ts(*secs))
            } else {
                CachedNote::synced(id, "u1", "cached", ts(*secs))
            });
        }

        let out = apply_overlay(server.clone(), &cached);

        for note in &out {
            prop_assert!(!note.deleted);
            match cached.iter().find(|c| c.id == note.id) {
                Some(c) => prop_assert_eq!(note, c),
                None => prop_assert!(server.iter().any(|n| n.id == note.id)),
            }
        }
        for c in cached.iter().filter(|c| !c.deleted) {
            prop_assert!(out.iter().any(|n| n.id == c.id));
        }
        for c in cached.iter().filter(|c| c.deleted) {
            prop_assert!(out.iter().all(|n| n.id != c.id));
        }
        for pair in out.windows(2) {
            prop_assert!(pair[0].updated_at >= pair[1].updated_at);
        }
    }
}
