//! Incremental execution cache for kiln
//!
//! This crate decides whether the output of a unit of work can be reused or
//! whether the work must run, and persists results so they survive process
//! restarts and relocation of the cache directory:
//! - Content fingerprints of files and trees
//! - Identities derived from fingerprints and work configuration
//! - Exclusive workspaces per identity
//! - Durable execution history
//! - Relocation-safe results files
//! - The work executor tying them together

pub mod config;
pub mod executor;
pub mod fingerprint;
pub mod hashing;
pub mod history;
pub mod identity;
pub mod operations;
pub mod results;
pub mod work;
pub mod workspace;

pub use config::{ConfigSource, ExecutorConfig, ExecutorConfigBuilder, HistoryBackend};
pub use executor::{CacheableInvocation, InvocationOutcome, WorkExecutor};
pub use fingerprint::{
    fingerprint, fingerprint_collection, normalize_path, FileKind, FileSnapshot,
    FileSystemAccess, Fingerprint, Fingerprinter, LocalFileSystem, NormalizationStrategy,
    SnapshotEntry,
};
pub use hashing::{hash_file, HashCode, Hasher};
pub use history::{
    ExecutionHistoryStore, ExecutionOutcome, FileHistoryStore, HistoryEntry, InMemoryHistoryStore,
};
pub use identity::{resolve, Identity, InputFingerprints, Producer, SecondaryInputs};
pub use operations::{Operation, OperationId, OperationScope, OperationState, OperationTracker};
pub use results::{ResultLocation, ResultSet, ResultsCodec};
pub use work::{Caching, ExecutionContext, UnitOfWork, UnitOfWorkBuilder, WorkBody};
pub use workspace::{Workspace, WorkspaceManager};
