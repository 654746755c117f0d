use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    core::{
        cache::OfflineCacheService,
        queue::{DEFAULT_BATCH_SIZE, OfflineQueueService},
    },
    op::{MutationInput, MutationQueueItem},
    persist::{PersistError, PersistResult, StorageAdapter},
    types::{MutationOperation, MutationStatus, Timestamp},
};

use super::{
    conflict::{self, Resolution},
    events::SyncEvent,
    optimistic::{self, LocalChange, OptimisticWriter, StagedMutation},
    remote::{NetworkStatus, RemoteError, RemoteNote, RemoteNoteService},
};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("sync manager channel closed")]
    ChannelClosed,
    #[error("blocking storage task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub compact_before_drain: bool,
    pub max_attempts: u32,
    pub retry_failed_on_reconnect: bool,
    pub command_capacity: usize,
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            compact_before_drain: true,
            max_attempts: 5,
            retry_failed_on_reconnect: true,
            command_capacity: 256,
            event_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub last_sync_at: Option<Timestamp>,
    pub is_online: bool,
    pub queue_size: usize,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub synced: usize,
    pub failed: usize,
    pub compacted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrateReport {
    pub taken_remote: usize,
    pub kept_local: usize,
    pub dropped_mutations: usize,
}

pub struct SyncHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<SyncEvent>,
    network: NetworkStatus,
}

impl Clone for SyncHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
            network: self.network.clone(),
        }
    }
}

enum Command {
    Enqueue {
        input: MutationInput,
        resp: oneshot::Sender<Result<MutationQueueItem, SyncError>>,
    },
    Stage {
        change: LocalChange,
        at: Timestamp,
        resp: oneshot::Sender<Result<StagedMutation, SyncError>>,
    },
    Compensate {
        staged: StagedMutation,
        resp: oneshot::Sender<Result<(), SyncError>>,
    },
    Drain {
        resp: oneshot::Sender<Result<DrainReport, SyncError>>,
    },
    Hydrate {
        notes: Vec<RemoteNote>,
        resp: oneshot::Sender<Result<HydrateReport, SyncError>>,
    },
    RetryFailed {
        resp: oneshot::Sender<Result<usize, SyncError>>,
    },
    State {
        resp: oneshot::Sender<Result<SyncState, SyncError>>,
    },
    SignOut {
        resp: oneshot::Sender<Result<(), SyncError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the single-writer sync loop over `storage`.
///
/// The loop drains the queue whenever `network` flips to online and after
/// every local enqueue made while online.
pub fn spawn_sync_manager<R: RemoteNoteService>(
    storage: Arc<dyn StorageAdapter>,
    remote: R,
    network: NetworkStatus,
    config: SyncConfig,
) -> SyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_capacity.max(1));
    let (events_tx, _) = broadcast::channel::<SyncEvent>(config.event_capacity.max(1));
    let mut net_rx = network.subscribe();

    let mut manager = Manager {
        cache: OfflineCacheService::new(Arc::clone(&storage)),
        queue: OfflineQueueService::new(storage),
        remote,
        network: network.clone(),
        config,
        events_tx: events_tx.clone(),
        last_sync_at: None,
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if manager.handle_command(cmd).await {
                        break;
                    }
                }
                Ok(()) = net_rx.changed() => {
                    let online = *net_rx.borrow_and_update();
                    manager.on_connectivity(online).await;
                }
            }
        }
        tracing::debug!("sync manager stopped");
    });

    SyncHandle {
        cmd_tx,
        events_tx,
        network,
    }
}

impl SyncHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// Flips connectivity; going online triggers a drain.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(online);
    }

    pub async fn enqueue(&self, input: MutationInput) -> Result<MutationQueueItem, SyncError> {
        self.request(|resp| Command::Enqueue { input, resp }).await?
    }

    /// Applies `change` to the cache and queues it (optimistic stage).
    pub async fn stage(&self, change: LocalChange, at: Timestamp) -> Result<StagedMutation, SyncError> {
        self.request(|resp| Command::Stage { change, at, resp }).await?
    }

    /// Rolls back a staged change that will not be retried.
    pub async fn compensate(&self, staged: StagedMutation) -> Result<(), SyncError> {
        self.request(|resp| Command::Compensate { staged, resp }).await?
    }

    pub async fn drain(&self) -> Result<DrainReport, SyncError> {
        self.request(|resp| Command::Drain { resp }).await?
    }

    /// Reconciles server notes into the cache with last-write-wins.
    pub async fn hydrate(&self, notes: Vec<RemoteNote>) -> Result<HydrateReport, SyncError> {
        self.request(|resp| Command::Hydrate { notes, resp }).await?
    }

    pub async fn retry_failed(&self) -> Result<usize, SyncError> {
        self.request(|resp| Command::RetryFailed { resp }).await?
    }

    pub async fn state(&self) -> Result<SyncState, SyncError> {
        self.request(|resp| Command::State { resp }).await?
    }

    /// Purges all local notes and mutations.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        self.request(|resp| Command::SignOut { resp }).await?
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.request(|resp| Command::Shutdown { resp }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        rx.await.map_err(|_| SyncError::ChannelClosed)
    }
}

struct Manager<R> {
    cache: OfflineCacheService,
    queue: OfflineQueueService,
    remote: R,
    network: NetworkStatus,
    config: SyncConfig,
    events_tx: broadcast::Sender<SyncEvent>,
    last_sync_at: Option<Timestamp>,
}

impl<R: RemoteNoteService> Manager<R> {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Enqueue { input, resp } => {
                let queue = self.queue.clone();
                let res = blocking(move || queue.enqueue(input)).await;
                let queued = self.announce_enqueued(res.as_ref().ok());
                let _ = resp.send(res);
                if queued {
                    self.drain_if_online().await;
                }
            }
            Command::Stage { change, at, resp } => {
                let writer = self.writer();
                let res = blocking(move || writer.stage(change, at)).await;
                let queued = self.announce_enqueued(res.as_ref().ok().map(|staged| &staged.item));
                let _ = resp.send(res);
                if queued {
                    self.drain_if_online().await;
                }
            }
            Command::Compensate { staged, resp } => {
                let writer = self.writer();
                let _ = resp.send(blocking(move || writer.compensate(&staged)).await);
            }
            Command::Drain { resp } => {
                let _ = resp.send(self.drain().await);
            }
            Command::Hydrate { notes, resp } => {
                let _ = resp.send(self.hydrate(notes).await);
            }
            Command::RetryFailed { resp } => {
                let _ = resp.send(self.retry_failed().await);
            }
            Command::State { resp } => {
                let _ = resp.send(self.state().await);
            }
            Command::SignOut { resp } => {
                let cache = self.cache.clone();
                let res = blocking(move || cache.clear_all()).await;
                if res.is_ok() {
                    self.last_sync_at = None;
                }
                let _ = resp.send(res);
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    async fn on_connectivity(&mut self, online: bool) {
        let _ = self.events_tx.send(SyncEvent::OnlineChanged { online });
        if !online {
            tracing::info!("offline, pausing sync");
            return;
        }

        tracing::info!("online, draining mutation queue");
        if self.config.retry_failed_on_reconnect {
            if let Err(err) = self.retry_failed().await {
                tracing::warn!(error = %err, "could not reset failed mutations");
            }
        }
        self.drain_if_online().await;
    }

    async fn drain_if_online(&mut self) {
        if !self.network.is_online() {
            return;
        }
        if let Err(err) = self.drain().await {
            tracing::warn!(error = %err, "queue drain aborted");
        }
    }

    #[tracing::instrument(skip_all)]
    async fn drain(&mut self) -> Result<DrainReport, SyncError> {
        let mut report = DrainReport::default();
        if !self.network.is_online() {
            tracing::debug!("offline, skipping drain");
            return Ok(report);
        }

        if self.config.compact_before_drain {
            let (cache, queue) = (self.cache.clone(), self.queue.clone());
            report.compacted = blocking(move || {
                let removed = queue.compact()?;
                optimistic::sweep_tombstones(&cache, &queue)?;
                Ok(removed)
            })
            .await?;
        }

        let size = self.config.batch_size.max(1);
        'drain: while self.network.is_online() {
            let queue = self.queue.clone();
            let batch = blocking(move || queue.get_pending_batch(size)).await?;
            if batch.is_empty() {
                break;
            }

            for item in batch {
                if !self.network.is_online() {
                    break 'drain;
                }

                match self.replay(&item).await {
                    Ok(confirmed) => {
                        let (cache, queue) = (self.cache.clone(), self.queue.clone());
                        let done = item.clone();
                        let reassigned = blocking(move || {
                            optimistic::confirm_replayed(&cache, &queue, &done, confirmed.as_ref())
                        })
                        .await?;
                        report.synced += 1;
                        let _ = self.events_tx.send(SyncEvent::ItemSynced {
                            id: item.id,
                            note_id: item.note_id,
                        });
                        if let Some(r) = reassigned {
                            let _ = self.events_tx.send(SyncEvent::NoteIdAssigned {
                                local_id: r.local_id,
                                remote_id: r.remote_id,
                            });
                            // rest of the batch still names the local id
                            continue 'drain;
                        }
                    }
                    Err(err) => {
                        let message = err.to_string();
                        tracing::warn!(id = %item.id, note_id = %item.note_id, error = %message, "mutation replay failed");
                        let queue = self.queue.clone();
                        let failed = item.clone();
                        let recorded = message.clone();
                        blocking(move || queue.record_failure(&failed, &recorded)).await?;
                        report.failed += 1;
                        let _ = self.events_tx.send(SyncEvent::ItemFailed {
                            id: item.id,
                            note_id: item.note_id,
                            error: message,
                        });
                    }
                }
            }
        }

        if report.synced > 0 {
            self.last_sync_at = Some(Utc::now());
        }
        tracing::debug!(synced = report.synced, failed = report.failed, "drain finished");
        let _ = self.events_tx.send(SyncEvent::Drained {
            synced: report.synced,
            failed: report.failed,
        });
        Ok(report)
    }

    async fn replay(&self, item: &MutationQueueItem) -> Result<Option<RemoteNote>, RemoteError> {
        match item.operation {
            MutationOperation::Create => self.remote.create(&item.note_id, &item.payload).await.map(Some),
            MutationOperation::Update => self.remote.update(&item.note_id, &item.payload).await.map(Some),
            MutationOperation::Delete => match self.remote.delete(&item.note_id).await {
                // already gone on the server
                Ok(()) | Err(RemoteError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            },
        }
    }

    async fn hydrate(&mut self, notes: Vec<RemoteNote>) -> Result<HydrateReport, SyncError> {
        let (cache, queue) = (self.cache.clone(), self.queue.clone());
        let outcomes = blocking(move || {
            let mut out = Vec::with_capacity(notes.len());
            for note in &notes {
                out.push((note.id.clone(), conflict::apply_remote(&cache, &queue, note)?));
            }
            Ok(out)
        })
        .await?;

        let mut report = HydrateReport::default();
        for (note_id, outcome) in outcomes {
            match outcome.resolution {
                Resolution::TakeRemote => report.taken_remote += 1,
                Resolution::KeepLocal => report.kept_local += 1,
            }
            report.dropped_mutations += outcome.dropped;
            if outcome.dropped > 0 {
                let _ = self.events_tx.send(SyncEvent::ConflictResolved {
                    note_id,
                    dropped: outcome.dropped,
                });
            }
        }
        Ok(report)
    }

    async fn retry_failed(&self) -> Result<usize, SyncError> {
        let queue = self.queue.clone();
        let max_attempts = self.config.max_attempts;
        blocking(move || queue.retry_failed(max_attempts)).await
    }

    async fn state(&self) -> Result<SyncState, SyncError> {
        let queue = self.queue.clone();
        let items = blocking(move || queue.get_queue()).await?;
        let count = |status: MutationStatus| items.iter().filter(|i| i.status == status).count();
        Ok(SyncState {
            last_sync_at: self.last_sync_at,
            is_online: self.network.is_online(),
            queue_size: items.len(),
            pending: count(MutationStatus::Pending),
            failed: count(MutationStatus::Failed),
        })
    }

    fn writer(&self) -> OptimisticWriter {
        OptimisticWriter::new(self.cache.clone(), self.queue.clone())
    }

    fn announce_enqueued(&self, item: Option<&MutationQueueItem>) -> bool {
        let Some(item) = item else {
            return false;
        };
        let _ = self.events_tx.send(SyncEvent::Enqueued {
            id: item.id.clone(),
            note_id: item.note_id.clone(),
        });
        true
    }
}

async fn blocking<T, F>(f: F) -> Result<T, SyncError>
where
    F: FnOnce() -> PersistResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| SyncError::Join(err.to_string()))?
        .map_err(SyncError::from)
}
