use chrono::{TimeZone, Utc};

use notesync::{
    core::compact::compact_queue,
    note::NotePayload,
    op::{MutationInput, MutationQueueItem},
    types::{MutationOperation, MutationStatus, Timestamp},
};

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
}

fn op(id: &str, note_id: &str, operation: MutationOperation, title: Option<&str>, secs: i64) -> MutationQueueItem {
    MutationInput {
        id: Some(id.to_string()),
        ..MutationInput::new(
            note_id,
            operation,
            NotePayload {
                title: title.map(str::to_string),
                ..NotePayload::default()
            },
            ts(secs),
        )
    }
    .into_item()
}

#[test]
fn create_then_delete_disappears() {
    let out = compact_queue(&[
        op("q1", "n1", MutationOperation::Create, Some("a"), 1),
        op("q2", "n1", MutationOperation::Update, Some("b"), 2),
        op("q3", "n1", MutationOperation::Delete, None, 3),
    ]);
    assert!(out.is_empty());
}

#[test]
fn updates_then_delete_keep_only_the_delete() {
    let out = compact_queue(&[
        op("q1", "n1", MutationOperation::Update, Some("a"), 1),
        op("q2", "n1", MutationOperation::Delete, None, 2),
    ]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].id, "q2");
    assert_eq!(out[0].operation, MutationOperation::Delete);
}

#[test]
fn create_absorbs_later_updates() {
    let mut described = op("q2", "n1", MutationOperation::Update, None, 2);
    described.payload.description = Some("body".to_string());

    let out = compact_queue(&[
        op("q1", "n1", MutationOperation::Create, Some("a"), 1),
        described,
        op("q3", "n1", MutationOperation::Update, Some("c"), 3),
    ]);

    assert_eq!(out.len(), 1);
    let merged = &out[0];
    assert_eq!(merged.operation, MutationOperation::Create);
    assert_eq!(merged.id, "q3");
    assert_eq!(merged.client_updated_at, ts(3));
    assert_eq!(merged.payload.title.as_deref(), Some("c"));
    assert_eq!(merged.payload.description.as_deref(), Some("body"));
}

#[test]
fn updates_alone_merge_into_one_update() {
    let mut failed = op("q2", "n1", MutationOperation::Update, Some("b"), 2);
    failed.status = MutationStatus::Failed;

    let out = compact_queue(&[op("q1", "n1", MutationOperation::Update, Some("a"), 1), failed]);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].operation, MutationOperation::Update);
    assert_eq!(out[0].payload.title.as_deref(), Some("b"));
    assert_eq!(out[0].status, MutationStatus::Pending);
}

#[test]
fn input_order_does_not_matter_and_output_is_replay_ordered() {
    let out = compact_queue(&[
        op("q4", "n2", MutationOperation::Update, Some("late"), 9),
        op("q3", "n1", MutationOperation::Update, Some("second"), 5),
        op("q1", "n1", MutationOperation::Create, Some("first"), 1),
        op("q2", "n3", MutationOperation::Delete, None, 3),
    ]);

    let ids: Vec<&str> = out.iter().map(|item| item.note_id.as_str()).collect();
    assert_eq!(ids, ["n3", "n1", "n2"]);
    assert_eq!(out[1].operation, MutationOperation::Create);
    assert_eq!(out[1].payload.title.as_deref(), Some("second"));
}
