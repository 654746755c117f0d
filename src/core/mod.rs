//! Cache and queue services over a [`crate::persist::StorageAdapter`].

/// Local note snapshot service.
pub mod cache;
/// Mutation queue compaction.
pub mod compact;
/// Durable mutation queue service.
pub mod queue;
