pub mod backoff;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod events;
pub mod store;

pub use chunk::{ChunkData, ChunkDiff, ChunkIndex, ChunkMetadata, VersionMismatch};
pub use config::{ConfigError, ConflictStrategy, RemoteConfig, SyncConfig, SyncDirection};
pub use engine::{EngineError, SyncEngine, SyncReport, SyncState, SyncStatus};
pub use events::{ListenerId, SyncEvent, SyncPhase};
pub use store::{
    ChunkStore, CleanupReport, ConflictOutcome, LocalStore, LocalStoreError, MergeAction,
    MergeOutcome, StoreError,
};
