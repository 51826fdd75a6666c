//! Operations coordinator.
//!
//! Runs `sync()`, `rebuildIndex()` and `search()` as background tasks and
//! hands back a handle with the event stream of the run.
//!
//! Locking:
//! - sync and rebuild share one write lock; a second one is rejected as busy.
//! - a rebuild holds the index lock exclusively, searches hold it shared.
//! - starting a search cancels the previous one and waits for it to finish.

mod events;
mod status;

pub use events::{percent, EventSink, OperationEvent, OperationKind};
pub use status::{OperationRegistry, OperationStatus};

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{IndexMeta, IndexRepository};
use crate::errors::AppError;
use crate::indexer::IndexBuilder;
use crate::manifest::ManifestClient;
use crate::models::{Build, IndexReport, SearchOutcome, SearchPath, SyncReport};
use crate::reconcile::ChangeReconciler;
use crate::search::QueryEngine;
use crate::snapshot::SnapshotStore;

/// The count reported by `Complete` when an operation succeeds.
pub trait Completion {
    fn count(&self) -> usize;
}

impl Completion for SyncReport {
    fn count(&self) -> usize {
        self.counts.total()
    }
}

impl Completion for IndexReport {
    fn count(&self) -> usize {
        self.rows
    }
}

impl Completion for SearchOutcome {
    fn count(&self) -> usize {
        self.returned
    }
}

/// A running operation.
pub struct OperationHandle<T> {
    pub id: Uuid,
    pub kind: OperationKind,
    /// Ends with exactly one `Complete` or `Error` event.
    pub events: UnboundedReceiver<OperationEvent>,
    cancel: CancellationToken,
    task: JoinHandle<Result<T, AppError>>,
}

impl<T> OperationHandle<T> {
    /// Request early termination. Only searches observe it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to finish.
    pub async fn wait(self) -> Result<T, AppError> {
        self.task.await?
    }
}

fn spawn<T, F, Fut>(kind: OperationKind, cancel: CancellationToken, body: F) -> OperationHandle<T>
where
    T: Completion + Send + 'static,
    F: FnOnce(EventSink) -> Fut,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
{
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let events = EventSink::new(tx);
    let span = tracing::info_span!("operation", kind = %kind, run_id = %id);
    let work = body(events.clone());

    let task = tokio::spawn(
        async move {
            tracing::info!("Operation started");
            let result = work.await;
            match &result {
                Ok(value) => {
                    tracing::info!("Operation complete ({})", value.count());
                    events.complete(value.count());
                }
                Err(err) => {
                    tracing::error!("Operation failed: {}", err);
                    events.error(err);
                }
            }
            result
        }
        .instrument(span),
    );

    OperationHandle {
        id,
        kind,
        events: rx,
        cancel,
        task,
    }
}

/// Index statistics for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    /// Rows currently in the index
    pub rows: i64,
    #[serde(flatten)]
    pub meta: IndexMeta,
}

#[derive(Clone)]
pub struct Operations {
    config: Arc<Config>,
    client: Arc<ManifestClient>,
    store: SnapshotStore,
    write_lock: Arc<Mutex<()>>,
    index_lock: Arc<RwLock<()>>,
    search_gate: Arc<Mutex<()>>,
    current_search: Arc<Mutex<CancellationToken>>,
}

impl Operations {
    pub fn new(config: Config) -> Result<Self, AppError> {
        let client = ManifestClient::new(&config)?;
        Ok(Self {
            store: SnapshotStore::new(config.snapshot_dir.clone()),
            client: Arc::new(client),
            config: Arc::new(config),
            write_lock: Arc::new(Mutex::new(())),
            index_lock: Arc::new(RwLock::new(())),
            search_gate: Arc::new(Mutex::new(())),
            current_search: Arc::new(Mutex::new(CancellationToken::new())),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    fn acquire_write(&self, kind: OperationKind) -> Result<tokio::sync::OwnedMutexGuard<()>, AppError> {
        self.write_lock.clone().try_lock_owned().map_err(|_| {
            tracing::warn!("Rejected {}: a sync or index rebuild is running", kind);
            AppError::Busy(format!(
                "cannot start {} while a sync or index rebuild is running",
                kind
            ))
        })
    }

    pub fn start_sync(&self) -> Result<OperationHandle<SyncReport>, AppError> {
        let guard = self.acquire_write(OperationKind::Sync)?;
        let reconciler = ChangeReconciler::new(
            self.client.clone(),
            self.store.clone(),
            self.config.changelog_dir.clone(),
        );

        Ok(spawn(
            OperationKind::Sync,
            CancellationToken::new(),
            move |events| async move {
                let _guard = guard;
                reconciler.sync(&events).await
            },
        ))
    }

    pub fn start_rebuild(&self) -> Result<OperationHandle<IndexReport>, AppError> {
        let guard = self.acquire_write(OperationKind::RebuildIndex)?;
        let builder = IndexBuilder::new(self.store.clone(), self.config.index_batch_size);
        let index_path = self.config.index_path.clone();
        let index_lock = self.index_lock.clone();

        Ok(spawn(
            OperationKind::RebuildIndex,
            CancellationToken::new(),
            move |events| async move {
                let _guard = guard;
                let _index = index_lock.write_owned().await;
                let repo = IndexRepository::open(&index_path)
                    .await
                    .map_err(AppError::into_index_build)?;
                let result = builder.rebuild(&repo, &events).await;
                repo.close().await;
                result
            },
        ))
    }

    /// Start a search, cancelling the one in flight. `limit` is capped at
    /// the configured search limit.
    pub async fn start_search(
        &self,
        keyword: impl Into<String>,
        limit: Option<usize>,
    ) -> OperationHandle<SearchOutcome> {
        let keyword = keyword.into();
        let limit = limit
            .unwrap_or(self.config.search_limit)
            .min(self.config.search_limit);
        let cancel = CancellationToken::new();

        let previous = {
            let mut current = self.current_search.lock().await;
            std::mem::replace(&mut *current, cancel.clone())
        };
        previous.cancel();

        let engine = QueryEngine::new(self.store.clone(), self.config.index_path.clone());
        let gate = self.search_gate.clone();
        let index_lock = self.index_lock.clone();
        let token = cancel.clone();

        spawn(OperationKind::Search, cancel, move |events| async move {
            let _gate = gate.lock_owned().await;

            let _index = match index_lock.clone().try_read_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    events.progress("Waiting for the index rebuild to finish", None);
                    tokio::select! {
                        guard = index_lock.read_owned() => guard,
                        _ = token.cancelled() => {
                            let mut outcome = SearchOutcome::empty(SearchPath::Indexed);
                            outcome.cancelled = true;
                            return Ok(outcome);
                        }
                    }
                }
            };

            engine.search(&keyword, limit, &token, &events).await
        })
    }

    /// Cancel the search in flight, if any.
    pub async fn cancel_search(&self) {
        self.current_search.lock().await.cancel();
    }

    /// The build the snapshot was materialized from.
    pub async fn local_build(&self) -> Result<Option<Build>, AppError> {
        self.store.local_build().await
    }

    /// Local build number for response envelopes; unreadable markers count
    /// as no build.
    pub async fn local_build_number(&self) -> Option<i64> {
        self.local_build()
            .await
            .ok()
            .flatten()
            .map(|build| build.build_number)
    }

    /// Statistics of the completed index, `None` if there is none.
    pub async fn index_status(&self) -> Result<Option<IndexStatus>, AppError> {
        let Some(repo) = IndexRepository::open_read_only(&self.config.index_path).await? else {
            return Ok(None);
        };
        let status = match repo.meta().await? {
            Some(meta) => Some(IndexStatus {
                rows: repo.count().await?,
                meta,
            }),
            None => None,
        };
        repo.close().await;
        Ok(status)
    }

    /// Display name for a record id from the index.
    pub async fn lookup_name(&self, id: &str) -> Result<Option<String>, AppError> {
        let Some(repo) = IndexRepository::open_read_only(&self.config.index_path).await? else {
            return Err(AppError::QueryDataMissing(
                "the index has not been built".to_string(),
            ));
        };
        let name = repo.lookup_name(id).await;
        repo.close().await;
        name
    }
}
