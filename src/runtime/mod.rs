//! Async sync manager, remote ports, and conflict handling.

/// Last-write-wins reconciliation.
pub mod conflict;
/// Event stream types emitted by the sync manager.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
/// Stage, commit, and compensate for local edits.
pub mod optimistic;
/// Remote note service and network status.
pub mod remote;
