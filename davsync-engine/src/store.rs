use std::collections::{HashMap, HashSet};
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use davsync_core::{EntryType, WebdavClient, WebdavError};

use crate::backoff::Backoff;
use crate::chunk::{
    ChunkData, ChunkDiff, ChunkIndex, ChunkMetadata, checksum_of, diff_chunks, now_millis,
};
use crate::config::{ConflictStrategy, SyncDirection};

const INDEX_FILE: &str = ".chunk-index.json";
const INDEX_TMP_FILE: &str = ".chunk-index.json.tmp";
const CHUNK_DIR: &str = "chunks";
const MAX_ATTEMPTS: u32 = 3;

/// Error produced by the host's local persistence callbacks.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LocalStoreError(pub String);

impl From<String> for LocalStoreError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for LocalStoreError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// The host application's side of a sync: a snapshot of local chunk
/// metadata plus load/store/remove for local payloads. The engine never
/// assumes a particular local storage technology.
pub trait LocalStore {
    fn local_chunks(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, ChunkMetadata>, LocalStoreError>>;
    fn load(&self, id: &str) -> impl Future<Output = Result<Option<Value>, LocalStoreError>>;
    fn store(
        &self,
        id: &str,
        data: Value,
        meta: &ChunkMetadata,
    ) -> impl Future<Output = Result<(), LocalStoreError>>;
    fn remove(&self, id: &str) -> impl Future<Output = Result<(), LocalStoreError>>;
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote error: {0}")]
    Remote(#[from] WebdavError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("chunk {id} is {size} bytes, exceeding the {max} byte limit")]
    ChunkTooLarge { id: String, size: u64, max: u64 },
    #[error("no metadata found for chunk: {0}")]
    UnknownChunk(String),
    #[error("manual resolution required for chunk: {0}")]
    ManualConflict(String),
    #[error("remote data unavailable for chunk: {0}")]
    MissingRemoteData(String),
    #[error("local data missing for chunk: {0}")]
    MissingLocalData(String),
    #[error("local store error: {0}")]
    Local(#[from] LocalStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Uploaded,
    Downloaded,
    Resolved,
    Unresolved,
    DeletedLocal,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    pub uploaded: usize,
    pub downloaded: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    UploadedLocal,
    DownloadedRemote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupReport {
    pub removed_bodies: usize,
    pub pruned_entries: usize,
}

/// Chunk CRUD with integrity verification and version discipline, backed
/// by the WebDAV client. The in-memory index mirrors the remote
/// `.chunk-index.json`; persisting it is the commit point of every
/// metadata change.
pub struct ChunkStore {
    client: WebdavClient,
    sync_path: String,
    device_id: String,
    max_chunk_size: u64,
    index: ChunkIndex,
    chunk_dir_ready: bool,
    backoff: Backoff,
}

impl ChunkStore {
    pub fn new(
        client: WebdavClient,
        sync_path: &str,
        device_id: impl Into<String>,
        max_chunk_size: u64,
    ) -> Self {
        Self {
            client,
            sync_path: normalize_sync_path(sync_path),
            device_id: device_id.into(),
            max_chunk_size,
            index: ChunkIndex::empty(),
            chunk_dir_ready: false,
            backoff: Backoff::for_remote_ops(),
        }
    }

    /// Ensures the remote sync root exists, then loads the index, creating
    /// an empty one on first use.
    pub async fn initialize(&mut self) -> Result<(), StoreError> {
        self.ensure_sync_root().await?;
        match self.read_index().await? {
            Some(index) => self.index = index,
            None => {
                self.index = ChunkIndex::empty();
                self.persist_index().await?;
            }
        }
        Ok(())
    }

    pub async fn save_chunk<T: Serialize>(
        &mut self,
        id: &str,
        data: &T,
        data_type: &str,
    ) -> Result<ChunkMetadata, StoreError> {
        let value = serde_json::to_value(data)?;
        let now = now_millis();
        let meta = self.build_meta(id, &value, data_type, 1, now, now)?;
        self.write_chunk(&meta, value).await?;
        Ok(meta)
    }

    /// Reads a chunk and verifies its checksum. A corrupted or missing body
    /// surfaces as `Ok(None)` — the chunk is unavailable, never bad data.
    pub async fn load_chunk<T: DeserializeOwned>(
        &self,
        id: &str,
    ) -> Result<Option<ChunkData<T>>, StoreError> {
        let Some(raw) = self.load_chunk_value(id).await? else {
            return Ok(None);
        };
        let data = serde_json::from_value(raw.data)?;
        Ok(Some(ChunkData {
            meta: raw.meta,
            data,
        }))
    }

    pub async fn update_chunk<T: Serialize>(
        &mut self,
        id: &str,
        data: &T,
    ) -> Result<ChunkMetadata, StoreError> {
        let value = serde_json::to_value(data)?;
        self.update_chunk_value(id, value).await
    }

    /// Upsert used during sync transfer: update when the id is indexed,
    /// save as version 1 otherwise.
    pub async fn upload_chunk<T: Serialize>(
        &mut self,
        id: &str,
        data: &T,
        data_type: &str,
    ) -> Result<ChunkMetadata, StoreError> {
        let value = serde_json::to_value(data)?;
        self.upload_chunk_value(id, value, data_type).await
    }

    pub async fn delete_chunk(&mut self, id: &str) -> Result<(), StoreError> {
        let path = self.chunk_path(id);
        self.with_retry(|| self.client.delete_file(&path)).await?;
        if self.index.chunks.remove(id).is_some() {
            self.persist_index().await?;
        }
        Ok(())
    }

    pub fn chunk_metadata(&self, id: &str) -> Option<&ChunkMetadata> {
        self.index.chunks.get(id)
    }

    pub fn list_chunks(&self) -> Vec<ChunkMetadata> {
        let mut chunks: Vec<ChunkMetadata> = self.index.chunks.values().cloned().collect();
        chunks.sort_by(|a, b| a.id.cmp(&b.id));
        chunks
    }

    pub fn compare_chunks(&self, local: &HashMap<String, ChunkMetadata>) -> ChunkDiff {
        diff_chunks(local, &self.index.chunks)
    }

    /// Applies a diff: direction-gated transfer of the one-sided buckets,
    /// then conflict resolution for version mismatches. Every processed id
    /// is reported through `observe`. Manual conflicts are collected, not
    /// raised, so one conflict cannot abort the merge.
    pub async fn merge_diff<H: LocalStore>(
        &mut self,
        diff: &ChunkDiff,
        local_meta: &HashMap<String, ChunkMetadata>,
        direction: SyncDirection,
        strategy: ConflictStrategy,
        local: &H,
        mut observe: impl FnMut(&str, MergeAction),
    ) -> Result<MergeOutcome, StoreError> {
        let mut outcome = MergeOutcome::default();

        for id in &diff.local_only {
            if direction == SyncDirection::DownloadOnly {
                // The remote is authoritative: a chunk it no longer indexes
                // is deleted locally. Any other direction uploads instead,
                // so local data that merely has not been uploaded yet is
                // never destroyed.
                local.remove(id).await?;
                outcome.deleted += 1;
                observe(id, MergeAction::DeletedLocal);
                continue;
            }
            let meta = local_meta
                .get(id)
                .ok_or_else(|| StoreError::MissingLocalData(id.clone()))?;
            let data = local
                .load(id)
                .await?
                .ok_or_else(|| StoreError::MissingLocalData(id.clone()))?;
            self.upload_chunk_value(id, data, &meta.data_type).await?;
            outcome.uploaded += 1;
            observe(id, MergeAction::Uploaded);
        }

        for id in &diff.remote_only {
            if direction == SyncDirection::UploadOnly {
                outcome.skipped += 1;
                observe(id, MergeAction::Skipped);
                continue;
            }
            match self.load_chunk_value(id).await? {
                Some(chunk) => {
                    local.store(id, chunk.data, &chunk.meta).await?;
                    outcome.downloaded += 1;
                    observe(id, MergeAction::Downloaded);
                }
                None => {
                    // Unreadable remotes are cleanup's problem, not a sync
                    // abort.
                    outcome.skipped += 1;
                    observe(id, MergeAction::Skipped);
                }
            }
        }

        // Strict directions bypass the strategy: the transferring side wins.
        let effective = match direction {
            SyncDirection::UploadOnly => ConflictStrategy::Local,
            SyncDirection::DownloadOnly => ConflictStrategy::Remote,
            SyncDirection::Bidirectional => strategy,
        };
        for mismatch in &diff.version_mismatch {
            let meta = local_meta
                .get(&mismatch.id)
                .ok_or_else(|| StoreError::MissingLocalData(mismatch.id.clone()))?;
            match self
                .resolve_conflict(&mismatch.id, meta, effective, local)
                .await
            {
                Ok(ConflictOutcome::UploadedLocal) => {
                    outcome.uploaded += 1;
                    observe(&mismatch.id, MergeAction::Resolved);
                }
                Ok(ConflictOutcome::DownloadedRemote) => {
                    outcome.downloaded += 1;
                    observe(&mismatch.id, MergeAction::Resolved);
                }
                Err(StoreError::ManualConflict(id)) => {
                    outcome.conflicts.push(id);
                    observe(&mismatch.id, MergeAction::Unresolved);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(outcome)
    }

    pub async fn resolve_conflict<H: LocalStore>(
        &mut self,
        id: &str,
        local_meta: &ChunkMetadata,
        strategy: ConflictStrategy,
        local: &H,
    ) -> Result<ConflictOutcome, StoreError> {
        match strategy {
            ConflictStrategy::Local => self.apply_local_wins(id, local_meta, local).await,
            ConflictStrategy::Remote => self.apply_remote_wins(id, local).await,
            ConflictStrategy::Timestamp => {
                let remote_updated = self
                    .index
                    .chunks
                    .get(id)
                    .map(|meta| meta.updated_at)
                    .ok_or_else(|| StoreError::UnknownChunk(id.to_string()))?;
                if local_meta.updated_at > remote_updated {
                    self.apply_local_wins(id, local_meta, local).await
                } else {
                    self.apply_remote_wins(id, local).await
                }
            }
            ConflictStrategy::Manual => Err(StoreError::ManualConflict(id.to_string())),
        }
    }

    /// Deletes chunk bodies absent from the index and prunes index entries
    /// whose body is gone, recovering from partial writes in either
    /// direction.
    pub async fn cleanup(&mut self) -> Result<CleanupReport, StoreError> {
        let dir = self.chunk_dir();
        let entries = match self.with_retry(|| self.client.list_directory(&dir)).await {
            Ok(entries) => entries,
            // No chunk directory yet means nothing to clean.
            Err(WebdavError::NotFound(_)) => return Ok(CleanupReport::default()),
            Err(err) => return Err(err.into()),
        };

        let mut report = CleanupReport::default();
        let mut present = HashSet::new();
        for entry in &entries {
            if entry.entry_type != EntryType::File {
                continue;
            }
            let Some(id) = entry.name.strip_suffix(".json") else {
                continue;
            };
            present.insert(id.to_string());
            if !self.index.chunks.contains_key(id) {
                let path = self.chunk_path(id);
                self.with_retry(|| self.client.delete_file(&path)).await?;
                report.removed_bodies += 1;
                eprintln!("[davsync] cleanup: removed orphaned chunk body {id}");
            }
        }

        let dangling: Vec<String> = self
            .index
            .chunks
            .keys()
            .filter(|id| !present.contains(*id))
            .cloned()
            .collect();
        if !dangling.is_empty() {
            for id in &dangling {
                self.index.chunks.remove(id);
                eprintln!("[davsync] cleanup: pruned index entry without body: {id}");
            }
            report.pruned_entries = dangling.len();
            self.persist_index().await?;
        }

        Ok(report)
    }

    async fn apply_local_wins<H: LocalStore>(
        &mut self,
        id: &str,
        local_meta: &ChunkMetadata,
        local: &H,
    ) -> Result<ConflictOutcome, StoreError> {
        let data = local
            .load(id)
            .await?
            .ok_or_else(|| StoreError::MissingLocalData(id.to_string()))?;
        self.upload_chunk_value(id, data, &local_meta.data_type)
            .await?;
        Ok(ConflictOutcome::UploadedLocal)
    }

    async fn apply_remote_wins<H: LocalStore>(
        &mut self,
        id: &str,
        local: &H,
    ) -> Result<ConflictOutcome, StoreError> {
        let chunk = self
            .load_chunk_value(id)
            .await?
            .ok_or_else(|| StoreError::MissingRemoteData(id.to_string()))?;
        local.store(id, chunk.data, &chunk.meta).await?;
        Ok(ConflictOutcome::DownloadedRemote)
    }

    async fn load_chunk_value(&self, id: &str) -> Result<Option<ChunkData<Value>>, StoreError> {
        let path = self.chunk_path(id);
        let text = match self.with_retry(|| self.client.get_file(&path)).await {
            Ok(text) => text,
            Err(WebdavError::NotFound(_)) => {
                eprintln!("[davsync] warning: chunk body missing for {id}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let chunk: ChunkData<Value> = serde_json::from_str(&text)?;
        let payload = serde_json::to_vec(&chunk.data)?;
        if checksum_of(&payload) != chunk.meta.checksum {
            eprintln!("[davsync] warning: checksum mismatch for chunk {id}, treating as unavailable");
            return Ok(None);
        }
        Ok(Some(chunk))
    }

    async fn update_chunk_value(
        &mut self,
        id: &str,
        value: Value,
    ) -> Result<ChunkMetadata, StoreError> {
        let existing = self
            .index
            .chunks
            .get(id)
            .ok_or_else(|| StoreError::UnknownChunk(id.to_string()))?;
        let (version, created_at, data_type) = (
            existing.version + 1,
            existing.created_at,
            existing.data_type.clone(),
        );
        let meta = self.build_meta(id, &value, &data_type, version, created_at, now_millis())?;
        self.write_chunk(&meta, value).await?;
        Ok(meta)
    }

    async fn upload_chunk_value(
        &mut self,
        id: &str,
        value: Value,
        data_type: &str,
    ) -> Result<ChunkMetadata, StoreError> {
        if self.index.chunks.contains_key(id) {
            self.update_chunk_value(id, value).await
        } else {
            let now = now_millis();
            let meta = self.build_meta(id, &value, data_type, 1, now, now)?;
            self.write_chunk(&meta, value).await?;
            Ok(meta)
        }
    }

    fn build_meta(
        &self,
        id: &str,
        value: &Value,
        data_type: &str,
        version: u64,
        created_at: i64,
        updated_at: i64,
    ) -> Result<ChunkMetadata, StoreError> {
        let payload = serde_json::to_vec(value)?;
        let size = payload.len() as u64;
        if size > self.max_chunk_size {
            return Err(StoreError::ChunkTooLarge {
                id: id.to_string(),
                size,
                max: self.max_chunk_size,
            });
        }
        Ok(ChunkMetadata {
            id: id.to_string(),
            version,
            checksum: checksum_of(&payload),
            created_at,
            updated_at,
            size,
            data_type: data_type.to_string(),
            device_id: self.device_id.clone(),
        })
    }

    async fn write_chunk(&mut self, meta: &ChunkMetadata, value: Value) -> Result<(), StoreError> {
        self.ensure_chunk_dir().await?;
        let body = serde_json::to_string(&ChunkData {
            meta: meta.clone(),
            data: value,
        })?;
        let path = self.chunk_path(&meta.id);
        self.with_retry(|| self.client.put_file(&path, &body))
            .await?;
        self.index.chunks.insert(meta.id.clone(), meta.clone());
        self.persist_index().await?;
        Ok(())
    }

    /// Writes the index to a temporary name and MOVEs it over the real one
    /// so the replace is a single step on the server.
    async fn persist_index(&mut self) -> Result<(), StoreError> {
        self.index.last_updated = now_millis();
        let body = serde_json::to_string(&self.index)?;
        let tmp = self.index_tmp_path();
        let target = self.index_path();
        self.with_retry(|| self.client.put_file(&tmp, &body)).await?;
        self.with_retry(|| self.client.move_file(&tmp, &target))
            .await?;
        Ok(())
    }

    async fn read_index(&self) -> Result<Option<ChunkIndex>, StoreError> {
        let path = self.index_path();
        match self.with_retry(|| self.client.get_file(&path)).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(WebdavError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_sync_root(&self) -> Result<(), StoreError> {
        let mut prefix = String::new();
        for part in self.sync_path.split('/').filter(|part| !part.is_empty()) {
            prefix.push('/');
            prefix.push_str(part);
            let path = prefix.clone();
            self.with_retry(|| self.client.create_directory(&path))
                .await?;
        }
        Ok(())
    }

    async fn ensure_chunk_dir(&mut self) -> Result<(), StoreError> {
        if self.chunk_dir_ready {
            return Ok(());
        }
        let dir = self.chunk_dir();
        self.with_retry(|| self.client.create_directory(&dir)).await?;
        self.chunk_dir_ready = true;
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, WebdavError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WebdavError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    eprintln!(
                        "[davsync] transient remote error (attempt {}): {err}",
                        attempt + 1
                    );
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn index_path(&self) -> String {
        format!("{}/{}", self.sync_path, INDEX_FILE)
    }

    fn index_tmp_path(&self) -> String {
        format!("{}/{}", self.sync_path, INDEX_TMP_FILE)
    }

    fn chunk_dir(&self) -> String {
        format!("{}/{}", self.sync_path, CHUNK_DIR)
    }

    fn chunk_path(&self, id: &str) -> String {
        format!("{}/{}/{}.json", self.sync_path, CHUNK_DIR, id)
    }
}

fn normalize_sync_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
