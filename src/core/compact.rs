//! Per-note mutation queue compaction.

use hashbrown::HashMap;

use crate::{
    op::MutationQueueItem,
    types::{MutationOperation, MutationStatus},
};

/// Collapses each note's mutations into the minimal set to replay.
///
/// Per note, in `client_updated_at` order:
/// - a create whose chain ends in a delete disappears entirely;
/// - a chain ending in a delete without a create becomes that delete;
/// - a create followed by updates becomes one create carrying the merged payload;
/// - updates alone become one update carrying the merged payload.
///
/// The survivor keeps the latest item's id and timestamp. Output is in
/// replay order and every item is `Pending`.
pub fn compact_queue(items: &[MutationQueueItem]) -> Vec<MutationQueueItem> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_note: HashMap<&str, Vec<&MutationQueueItem>> = HashMap::new();
    for item in items {
        let ops = by_note.entry(item.note_id.as_str()).or_insert_with(|| {
            order.push(item.note_id.as_str());
            Vec::new()
        });
        ops.push(item);
    }

    let mut out = Vec::with_capacity(order.len());
    for note_id in order {
        let Some(mut ops) = by_note.remove(note_id) else {
            continue;
        };
        ops.sort_by(|a, b| a.replay_cmp(b));
        if let Some(survivor) = collapse(&ops) {
            out.push(survivor);
        }
    }

    out.sort_by(MutationQueueItem::replay_cmp);
    out
}

fn collapse(ops: &[&MutationQueueItem]) -> Option<MutationQueueItem> {
    let last = *ops.last()?;
    let first_create = ops.iter().find(|o| o.operation == MutationOperation::Create);

    let mut survivor = match (last.operation, first_create) {
        (MutationOperation::Delete, Some(_)) => return None,
        (MutationOperation::Delete, None) => last.clone(),
        (_, Some(create)) => {
            let mut merged = (*create).clone();
            for op in ops.iter().skip_while(|o| o.id != create.id).skip(1) {
                merged.payload.merge_from(&op.payload);
            }
            merged.id = last.id.clone();
            merged.client_updated_at = last.client_updated_at;
            merged
        }
        (_, None) => {
            let mut merged = last.clone();
            merged.operation = MutationOperation::Update;
            let mut payload = ops[0].payload.clone();
            for op in &ops[1..] {
                payload.merge_from(&op.payload);
            }
            merged.payload = payload;
            merged
        }
    };

    survivor.status = MutationStatus::Pending;
    Some(survivor)
}
