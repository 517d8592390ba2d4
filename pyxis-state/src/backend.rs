//! Backend traits, configuration and error types

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::lock::LockRecord;
use crate::snapshot::Snapshot;

/// Errors that can occur when interacting with a state backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The state is locked by another party
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// Version mismatch on a conditional write
    #[error("Version conflict on {state_id}: expected {expected}, found {actual}")]
    Conflict {
        state_id: String,
        expected: String,
        actual: String,
    },

    /// The lock was not found (for release/force-unlock operations)
    #[error("Lock not found: {0}")]
    LockNotFound(String),

    /// Holder token mismatch when trying to release
    #[error("Lock holder mismatch: expected {expected}, got {actual}")]
    LockMismatch { expected: String, actual: String },

    /// The backend type is not supported
    #[error("Unsupported backend type: {0}")]
    UnsupportedBackend(String),

    /// Configuration error
    #[error("Backend configuration error: {0}")]
    Configuration(String),

    /// The bucket does not exist
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Failed to create bucket
    #[error("Failed to create bucket: {0}")]
    BucketCreationFailed(String),

    /// Failed to create lock table
    #[error("Failed to create lock table: {0}")]
    TableCreationFailed(String),

    /// Snapshot is corrupted or invalid
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Snapshot lineage mismatch (prevents accidental overwrites)
    #[error("Snapshot lineage mismatch: expected {expected}, got {actual}")]
    LineageMismatch { expected: String, actual: String },

    /// Network or I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl BackendError {
    /// Create a Locked error from a LockRecord
    pub fn locked(lock: &LockRecord) -> Self {
        Self::Locked {
            lock_id: lock.id.clone(),
            who: lock.who.clone(),
            operation: lock.operation.clone(),
        }
    }

    /// Create a Conflict error for a conditional write
    pub fn conflict(
        state_id: impl Into<String>,
        expected: Option<&Version>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            state_id: state_id.into(),
            expected: expected
                .map(|v| v.to_string())
                .unwrap_or_else(|| "(none)".to_string()),
            actual: actual.into(),
        }
    }

    /// Create an unsupported backend error
    pub fn unsupported_backend(backend_type: impl Into<String>) -> Self {
        Self::UnsupportedBackend(backend_type.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Opaque version token owned by the object store
///
/// An ETag for S3, a counter for the local store. Compared only for
/// equality; a caller never interprets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client for the durable object store holding snapshots
///
/// Writes are versioned (optimistic concurrency) in addition to the lock,
/// as defense in depth against lock-bypassing callers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the latest snapshot and its version
    ///
    /// Returns `None` if no snapshot exists (first-time use)
    async fn read_latest(&self, state_id: &str) -> BackendResult<Option<(Snapshot, Version)>>;

    /// Write a snapshot conditioned on the version previously read
    ///
    /// `expected = None` means "create only if absent". Fails with
    /// `Conflict` when the stored version differs; the caller must never
    /// retry this silently.
    async fn write_if_version_matches(
        &self,
        state_id: &str,
        snapshot: &Snapshot,
        expected: Option<&Version>,
    ) -> BackendResult<Version>;

    /// Delete the snapshot (explicit teardown only)
    async fn delete(&self, state_id: &str) -> BackendResult<()>;

    /// Check if the backing storage exists
    async fn storage_exists(&self) -> BackendResult<bool>;

    /// Create the backing storage with versioning and encryption at rest
    async fn create_storage(&self) -> BackendResult<()>;

    /// Initialize the store (create storage if configured to)
    async fn init(&self) -> BackendResult<()>;
}

/// Client for the keyed lock table providing mutual exclusion
#[async_trait]
pub trait LockTable: Send + Sync {
    /// Atomically create the lock record; fails with `Locked` if a record
    /// with the same lock identifier already exists
    async fn acquire(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()>;

    /// Release the lock, conditional on the caller being the current holder
    async fn release(&self, lock_id: &str, record: &LockRecord) -> BackendResult<()>;

    /// Read the current lock record, if any
    async fn read_lock(&self, lock_id: &str) -> BackendResult<Option<LockRecord>>;

    /// Force release a lock by its holder token
    ///
    /// This is an administrative operation that should be used with caution
    async fn force_unlock(&self, lock_id: &str, holder_id: &str) -> BackendResult<()>;

    /// Initialize the lock table (create it if configured to)
    async fn init(&self) -> BackendResult<()>;
}

/// Configuration for a state backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Backend type (e.g., "s3", "local")
    pub backend_type: String,
    /// Backend-specific attributes
    pub attributes: HashMap<String, pyxis_core::descriptor::Value>,
}

impl BackendConfig {
    /// Build from the stack file's backend block
    pub fn from_block(block: &pyxis_core::stack::BackendBlock) -> Self {
        Self {
            backend_type: block.backend_type.clone(),
            attributes: block.attributes.clone(),
        }
    }

    /// Get a string attribute value
    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(pyxis_core::descriptor::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get a boolean attribute value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attributes.get(key) {
            Some(pyxis_core::descriptor::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Get a boolean attribute with a default value
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }
}
