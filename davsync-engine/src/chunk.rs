use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Metadata for one versioned unit of application data. Serialized field
/// names follow the persisted remote layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    pub id: String,
    pub version: u64,
    pub checksum: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub size: u64,
    pub data_type: String,
    pub device_id: String,
}

/// Exactly what gets written to a remote chunk file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkData<T> {
    pub meta: ChunkMetadata,
    pub data: T,
}

/// The `.chunk-index.json` document: the authoritative remote directory of
/// what chunks exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub chunks: HashMap<String, ChunkMetadata>,
    pub last_updated: i64,
}

impl ChunkIndex {
    pub fn empty() -> Self {
        Self {
            chunks: HashMap::new(),
            last_updated: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMismatch {
    pub id: String,
    pub local_version: u64,
    pub remote_version: u64,
}

/// Three-way partition of chunk ids from comparing a local metadata map
/// against the remote index. Ids whose versions match fall in no bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkDiff {
    pub local_only: Vec<String>,
    pub remote_only: Vec<String>,
    pub version_mismatch: Vec<VersionMismatch>,
}

impl ChunkDiff {
    pub fn total(&self) -> usize {
        self.local_only.len() + self.remote_only.len() + self.version_mismatch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

pub fn diff_chunks(
    local: &HashMap<String, ChunkMetadata>,
    remote: &HashMap<String, ChunkMetadata>,
) -> ChunkDiff {
    let mut diff = ChunkDiff::default();
    for (id, meta) in local {
        match remote.get(id) {
            None => diff.local_only.push(id.clone()),
            Some(remote_meta) if remote_meta.version != meta.version => {
                diff.version_mismatch.push(VersionMismatch {
                    id: id.clone(),
                    local_version: meta.version,
                    remote_version: remote_meta.version,
                });
            }
            Some(_) => {}
        }
    }
    for id in remote.keys() {
        if !local.contains_key(id) {
            diff.remote_only.push(id.clone());
        }
    }
    // Stable ordering keeps transfer order and progress reporting deterministic.
    diff.local_only.sort();
    diff.remote_only.sort();
    diff.version_mismatch.sort_by(|a, b| a.id.cmp(&b.id));
    diff
}

pub fn checksum_of(payload: &[u8]) -> String {
    Sha256::digest(payload)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
