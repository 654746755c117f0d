use std::sync::Arc;

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use notesync::{
    core::{compact::compact_queue, queue::OfflineQueueService},
    note::NotePayload,
    op::MutationInput,
    persist::{
        StorageAdapter,
        kv::{KvStorage, MemoryBackend},
        sqlite::SqliteStorage,
    },
    types::{MutationOperation, Timestamp},
};

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
}

fn edit(i: i64) -> MutationInput {
    MutationInput::new(
        format!("n{}", i % 50),
        MutationOperation::Update,
        NotePayload {
            title: Some(format!("title {i}")),
            ..NotePayload::default()
        },
        ts(i),
    )
}

fn seeded(storage: Arc<dyn StorageAdapter>, n: i64) -> OfflineQueueService {
    let queue = OfflineQueueService::new(storage);
    for i in 0..n {
        let _ = queue.enqueue(edit(i)).expect("enqueue");
    }
    queue
}

fn bench_enqueue(c: &mut Criterion) {
    c.bench_function("sqlite_enqueue_1k", |b| {
        b.iter(|| seeded(Arc::new(SqliteStorage::open_in_memory()), 1_000));
    });
    c.bench_function("kv_enqueue_1k", |b| {
        b.iter(|| seeded(Arc::new(KvStorage::new(MemoryBackend::default())), 1_000));
    });
}

fn bench_pending_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending_batch");
    let sqlite = seeded(Arc::new(SqliteStorage::open_in_memory()), 5_000);
    let kv = seeded(Arc::new(KvStorage::new(MemoryBackend::default())), 5_000);

    for n in [10usize, 100usize, 1000usize] {
        group.bench_with_input(BenchmarkId::new("sqlite", n), &n, |b, &n| {
            b.iter(|| {
                let _ = sqlite.get_pending_batch(n).expect("batch");
            });
        });
        group.bench_with_input(BenchmarkId::new("kv", n), &n, |b, &n| {
            b.iter(|| {
                let _ = kv.get_pending_batch(n).expect("batch");
            });
        });
    }

    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let items: Vec<_> = (0..5_000).map(|i| edit(i).into_item()).collect();
    c.bench_function("compact_5k_over_50_notes", |b| {
        b.iter(|| compact_queue(&items));
    });
}

criterion_group!(benches, bench_enqueue, bench_pending_batch, bench_compaction);
criterion_main!(benches);
