//! Offline-first note cache and mutation queue with replay against a remote
//! note service.
//!
//! # Examples
//!
//! Caching and queueing with [`core::cache::OfflineCacheService`] and
//! [`core::queue::OfflineQueueService`]:
//! ```
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use notesync::{
//!     core::{cache::OfflineCacheService, queue::OfflineQueueService},
//!     note::CachedNote,
//!     op::MutationInput,
//!     persist::{sqlite::SqliteStorage, StorageAdapter},
//!     types::MutationOperation,
//! };
//!
//! let storage: Arc<dyn StorageAdapter> = Arc::new(SqliteStorage::open_in_memory());
//! let cache = OfflineCacheService::new(storage.clone());
//! let queue = OfflineQueueService::new(storage);
//!
//! let note = CachedNote::synced("n1", "u1", "Groceries", Utc::now());
//! cache.save_note(&note).expect("save");
//! queue
//!     .enqueue(MutationInput::new("n1", MutationOperation::Update, note.to_payload(), Utc::now()))
//!     .expect("enqueue");
//! assert_eq!(queue.get_pending_batch(10).expect("batch").len(), 1);
//! ```
//!
//! Running the sync manager:
//! ```no_run
//! use chrono::Utc;
//! use notesync::{
//!     note::NotePayload,
//!     persist::{open_storage, StorageConfig},
//!     runtime::{
//!         handle::{spawn_sync_manager, SyncConfig},
//!         remote::{NetworkStatus, RemoteError, RemoteNote, RemoteNoteService},
//!     },
//! };
//!
//! struct Api;
//!
//! impl RemoteNoteService for Api {
//!     async fn create(&self, _id: &str, _p: &NotePayload) -> Result<RemoteNote, RemoteError> {
//!         Err(RemoteError::Unavailable("not wired".into()))
//!     }
//!     async fn update(&self, _id: &str, _p: &NotePayload) -> Result<RemoteNote, RemoteError> {
//!         Err(RemoteError::Unavailable("not wired".into()))
//!     }
//!     async fn delete(&self, _id: &str) -> Result<(), RemoteError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let storage = open_storage(&StorageConfig::default());
//! let handle = spawn_sync_manager(storage, Api, NetworkStatus::new(false), SyncConfig::default());
//! handle.set_online(true);
//! let report = handle.drain().await.expect("drain");
//! println!("synced {} mutations", report.synced);
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Cache, queue, and compaction services.
pub mod core;
/// Cached note records and payloads.
pub mod note;
/// Mutation queue items and persistence wrapper types.
pub mod op;
/// Storage port with SQLite and key-value backends.
pub mod persist;
/// Sync manager runtime, remote ports, and conflict handling.
pub mod runtime;
/// Shared primitive types and enums.
pub mod types;
