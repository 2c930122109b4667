use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use davsync_core::{WebdavClient, WebdavError};

use crate::chunk::{ChunkData, ChunkMetadata, now_millis};
use crate::config::{ConfigError, SyncConfig, SyncDirection};
use crate::events::{ListenerId, ListenerSet, SyncEvent, SyncPhase};
use crate::store::{ChunkStore, LocalStore, MergeAction, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] WebdavError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("connection test failed: {0}")]
    Connect(String),
    #[error("engine is not initialized")]
    NotInitialized,
    #[error("a sync run is already in progress")]
    SyncInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Conflict,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Error => "error",
        }
    }
}

/// Run state snapshot. Replaced wholesale on every transition so observers
/// never see a half-updated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync: Option<i64>,
    pub last_error: Option<String>,
    pub pending_uploads: usize,
    pub pending_downloads: usize,
    pub pending_conflicts: usize,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            status: SyncStatus::Idle,
            last_sync: None,
            last_error: None,
            pending_uploads: 0,
            pending_downloads: 0,
            pending_conflicts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub conflicts: Vec<String>,
    pub started_at: i64,
    pub finished_at: i64,
}

type SyncRunner = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// End-to-end synchronization: connect, diff, transfer, resolve, report.
/// One engine instance is owned by the host's composition root and shared
/// behind an `Arc`; all methods take `&self`.
pub struct SyncEngine {
    config: Mutex<SyncConfig>,
    device_id: String,
    store: tokio::sync::Mutex<Option<ChunkStore>>,
    state: Mutex<SyncState>,
    listeners: ListenerSet,
    sync_running: AtomicBool,
    runner: Mutex<Option<SyncRunner>>,
    auto_sync: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, device_id: impl Into<String>) -> Self {
        Self {
            config: Mutex::new(config),
            device_id: device_id.into(),
            store: tokio::sync::Mutex::new(None),
            state: Mutex::new(SyncState::default()),
            listeners: ListenerSet::default(),
            sync_running: AtomicBool::new(false),
            runner: Mutex::new(None),
            auto_sync: Mutex::new(None),
        }
    }

    /// Builds the remote client, verifies connectivity, initializes the
    /// chunk store and runs orphan cleanup. Arms the auto-sync timer when
    /// enabled and a runner has been registered.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let result = self.initialize_inner().await;
        if let Err(err) = &result {
            let message = err.to_string();
            self.transition(|state| {
                state.status = SyncStatus::Error;
                state.last_error = Some(message.clone());
            });
            self.listeners
                .emit(&SyncEvent::StatusChanged(SyncStatus::Error));
            self.listeners.emit(&SyncEvent::Error { message });
        }
        result
    }

    async fn initialize_inner(&self) -> Result<(), EngineError> {
        let config = self.lock_config().clone();
        let client = WebdavClient::with_timeout(
            &config.remote.url,
            config.remote.username.clone(),
            config.remote.password.clone(),
            config.remote.timeout,
        )?;

        let check = client.test_connection(&config.remote.sync_path).await;
        if !check.success {
            return Err(EngineError::Connect(
                check
                    .error
                    .unwrap_or_else(|| "connection test failed".to_string()),
            ));
        }

        let mut store = ChunkStore::new(
            client,
            &config.remote.sync_path,
            self.device_id.clone(),
            config.max_chunk_size,
        );
        store.initialize().await?;
        let cleaned = store.cleanup().await?;
        if cleaned.removed_bodies > 0 || cleaned.pruned_entries > 0 {
            eprintln!(
                "[davsync] cleanup: removed {} orphaned bodies, pruned {} index entries",
                cleaned.removed_bodies, cleaned.pruned_entries
            );
        }
        *self.store.lock().await = Some(store);

        self.transition(|state| {
            state.status = SyncStatus::Idle;
            state.last_error = None;
        });
        eprintln!(
            "[davsync] initialized: sync_path={} direction={}",
            config.remote.sync_path,
            config.direction.as_str()
        );

        if config.auto_sync {
            self.start_auto_sync();
        }
        Ok(())
    }

    /// One full sync run. Rejected with `SyncInProgress` while another run
    /// is in flight; unguarded concurrent runs would interleave
    /// read-modify-write cycles on the remote index.
    pub async fn sync<H: LocalStore>(&self, local: &H) -> Result<SyncReport, EngineError> {
        if self
            .sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::SyncInProgress);
        }
        let result = self.sync_inner(local).await;
        self.sync_running.store(false, Ordering::SeqCst);

        if let Err(err) = &result {
            let message = err.to_string();
            eprintln!("[davsync] sync failed: {message}");
            self.transition(|state| {
                state.status = SyncStatus::Error;
                state.last_error = Some(message.clone());
            });
            self.listeners
                .emit(&SyncEvent::StatusChanged(SyncStatus::Error));
            self.listeners.emit(&SyncEvent::Error { message });
        }
        result
    }

    async fn sync_inner<H: LocalStore>(&self, local: &H) -> Result<SyncReport, EngineError> {
        let started_at = now_millis();
        let (direction, strategy) = {
            let config = self.lock_config();
            (config.direction, config.conflict_resolution)
        };

        self.transition(|state| {
            state.status = SyncStatus::Syncing;
            state.last_error = None;
        });
        self.listeners
            .emit(&SyncEvent::StatusChanged(SyncStatus::Syncing));
        self.emit_progress(SyncPhase::Connecting, 0, 0, 0);

        let mut guard = self.store.lock().await;
        let store = guard.as_mut().ok_or(EngineError::NotInitialized)?;

        eprintln!("[davsync] sync start: direction={}", direction.as_str());
        self.emit_progress(SyncPhase::Listing, 0, 0, 0);
        let local_map = local.local_chunks().await.map_err(StoreError::from)?;
        let diff = store.compare_chunks(&local_map);
        let total = diff.total();

        let (pending_uploads, pending_downloads) = match direction {
            SyncDirection::Bidirectional => (diff.local_only.len(), diff.remote_only.len()),
            SyncDirection::UploadOnly => (diff.local_only.len(), 0),
            SyncDirection::DownloadOnly => (0, diff.remote_only.len()),
        };
        let pending_conflicts = diff.version_mismatch.len();
        self.transition(|state| {
            state.pending_uploads = pending_uploads;
            state.pending_downloads = pending_downloads;
            state.pending_conflicts = pending_conflicts;
        });

        let mut processed = 0usize;
        let outcome = store
            .merge_diff(
                &diff,
                &local_map,
                direction,
                strategy,
                local,
                |id, action| {
                    processed += 1;
                    let percent = if total == 0 {
                        100
                    } else {
                        (processed * 100 / total) as u8
                    };
                    let phase = match action {
                        MergeAction::Uploaded => SyncPhase::Uploading,
                        MergeAction::Downloaded => SyncPhase::Downloading,
                        _ => SyncPhase::Merging,
                    };
                    if action == MergeAction::Unresolved {
                        self.listeners.emit(&SyncEvent::Conflict {
                            id: id.to_string(),
                        });
                    }
                    self.transition(|state| match action {
                        MergeAction::Uploaded => {
                            state.pending_uploads = state.pending_uploads.saturating_sub(1);
                        }
                        MergeAction::Downloaded => {
                            state.pending_downloads = state.pending_downloads.saturating_sub(1);
                        }
                        MergeAction::Resolved | MergeAction::Unresolved => {
                            state.pending_conflicts = state.pending_conflicts.saturating_sub(1);
                        }
                        MergeAction::DeletedLocal | MergeAction::Skipped => {}
                    });
                    self.emit_progress(phase, percent, processed, total);
                },
            )
            .await?;
        drop(guard);

        let finished_at = now_millis();
        let report = SyncReport {
            uploaded: outcome.uploaded,
            downloaded: outcome.downloaded,
            deleted: outcome.deleted,
            skipped: outcome.skipped,
            conflicts: outcome.conflicts,
            started_at,
            finished_at,
        };
        let status = if report.conflicts.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Conflict
        };
        let conflicts = report.conflicts.len();
        self.transition(|state| {
            state.status = status;
            state.last_sync = Some(finished_at);
            state.last_error = None;
            state.pending_uploads = 0;
            state.pending_downloads = 0;
            state.pending_conflicts = conflicts;
        });
        self.listeners.emit(&SyncEvent::StatusChanged(status));
        self.emit_progress(SyncPhase::Completed, 100, processed, total);
        self.listeners.emit(&SyncEvent::Completed(report.clone()));
        eprintln!(
            "[davsync] sync done: uploaded={} downloaded={} deleted={} skipped={} conflicts={}",
            report.uploaded, report.downloaded, report.deleted, report.skipped, conflicts
        );
        Ok(report)
    }

    pub async fn save_chunk<T: Serialize>(
        &self,
        id: &str,
        data: &T,
        data_type: &str,
    ) -> Result<ChunkMetadata, EngineError> {
        let mut guard = self.store.lock().await;
        let store = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        Ok(store.save_chunk(id, data, data_type).await?)
    }

    pub async fn load_chunk<T: DeserializeOwned>(
        &self,
        id: &str,
    ) -> Result<Option<ChunkData<T>>, EngineError> {
        let guard = self.store.lock().await;
        let store = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(store.load_chunk(id).await?)
    }

    pub async fn delete_chunk(&self, id: &str) -> Result<(), EngineError> {
        let mut guard = self.store.lock().await;
        let store = guard.as_mut().ok_or(EngineError::NotInitialized)?;
        Ok(store.delete_chunk(id).await?)
    }

    pub async fn list_chunks(&self) -> Result<Vec<ChunkMetadata>, EngineError> {
        let guard = self.store.lock().await;
        let store = guard.as_ref().ok_or(EngineError::NotInitialized)?;
        Ok(store.list_chunks())
    }

    pub fn state(&self) -> SyncState {
        self.lock_state().clone()
    }

    /// Replaces the configuration. Connection changes take effect on the
    /// next `initialize()`.
    pub fn update_config(&self, config: SyncConfig) {
        *self.lock_config() = config;
    }

    pub fn add_listener(
        &self,
        listener: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Registers the closure the auto-sync timer invokes. The closure
    /// captures the host's local store, so the engine never has to hold
    /// data callbacks across runs.
    pub fn set_auto_sync_runner<F, Fut>(&self, runner: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: SyncRunner =
            Arc::new(move || Box::pin(runner()) as Pin<Box<dyn Future<Output = ()> + Send>>);
        *self.lock_runner() = Some(wrapped);
    }

    pub fn start_auto_sync(&self) {
        let interval = self
            .lock_config()
            .auto_sync_interval
            .max(Duration::from_millis(1));
        let Some(runner) = self.lock_runner().clone() else {
            eprintln!("[davsync] auto-sync enabled but no runner registered, timer not armed");
            return;
        };
        let mut slot = self.lock_auto_sync();
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                runner().await;
            }
        }));
    }

    pub fn stop_auto_sync(&self) {
        if let Some(handle) = self.lock_auto_sync().take() {
            handle.abort();
        }
    }

    /// Disarms the auto-sync timer and drops the store. Safe to call more
    /// than once.
    pub async fn destroy(&self) {
        self.stop_auto_sync();
        *self.store.lock().await = None;
    }

    fn transition(&self, update: impl FnOnce(&mut SyncState)) {
        let mut guard = self.lock_state();
        let mut next = guard.clone();
        update(&mut next);
        *guard = next;
    }

    fn emit_progress(&self, phase: SyncPhase, percent: u8, processed: usize, total: usize) {
        self.listeners.emit(&SyncEvent::Progress {
            phase,
            percent,
            processed,
            total,
        });
    }

    fn lock_config(&self) -> MutexGuard<'_, SyncConfig> {
        self.config.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_runner(&self) -> MutexGuard<'_, Option<SyncRunner>> {
        self.runner.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_auto_sync(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.auto_sync.lock().unwrap_or_else(|err| err.into_inner())
    }
}
