//! State coordinator - one safe mutation cycle
//!
//! The coordinator serializes state mutation: acquire the lock, read the
//! latest snapshot, hand it to the planning engine, write the result
//! conditioned on the version read, release the lock. Release runs on every
//! exit path; a failed release abandons the lock and is surfaced to the
//! operator rather than broken automatically.

use thiserror::Error;

use pyxis_core::descriptor::Descriptor;

use crate::backend::{BackendError, LockTable, ObjectStore, Version};
use crate::engine::{PlanningEngine, PlanningError};
use crate::lock::LockRecord;
use crate::snapshot::Snapshot;

/// Coordination cycle phases
///
/// `Idle -> Locking -> Locked -> Reading -> Planning -> Writing -> Releasing
/// -> Idle`; any phase may fail into `Failed`, which still goes through
/// `Releasing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Locking,
    Locked,
    Reading,
    Planning,
    Writing,
    Releasing,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Locking => "locking",
            Phase::Locked => "locked",
            Phase::Reading => "reading",
            Phase::Planning => "planning",
            Phase::Writing => "writing",
            Phase::Releasing => "releasing",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Errors a coordination cycle can surface
///
/// None of these are retried automatically; retry and backoff are the
/// caller's policy.
#[derive(Debug, Error)]
pub enum CycleError {
    /// The lock is held by another party; the cycle never started
    #[error("State is locked by {who} (lock ID: {lock_id}, operation: {operation})")]
    Locked {
        lock_id: String,
        who: String,
        operation: String,
    },

    /// The conditional write found a newer version: another writer mutated
    /// state despite the lock, which is a lock-discipline violation
    #[error("Version conflict on {state_id}: expected {expected}, found {actual}")]
    Conflict {
        state_id: String,
        expected: String,
        actual: String,
    },

    /// The planning engine failed; nothing was written
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// The engine returned a snapshot from a different lineage
    #[error("Planning engine changed snapshot lineage: expected {expected}, got {actual}")]
    Lineage { expected: String, actual: String },

    /// A backend operation failed, with the phase it failed in
    #[error("Backend error while {phase}: {source}")]
    Backend {
        phase: Phase,
        #[source]
        source: BackendError,
    },

    /// The lock could not be released and is now abandoned
    ///
    /// When `underlying` is `None` the cycle itself succeeded and the write
    /// is durable; only the lock needs manual intervention (force-unlock
    /// with the reported holder token).
    #[error(
        "Failed to release lock {lock_id} held by {who}: {source}. \
         The lock is abandoned and must be force-unlocked (holder token: {lock_id})",
        lock_id = .lock.id,
        who = .lock.who
    )]
    ReleaseFailed {
        lock: LockRecord,
        #[source]
        source: BackendError,
        underlying: Option<Box<CycleError>>,
    },
}

impl CycleError {
    fn from_backend(phase: Phase, source: BackendError) -> Self {
        match source {
            BackendError::Locked {
                lock_id,
                who,
                operation,
            } => CycleError::Locked {
                lock_id,
                who,
                operation,
            },
            BackendError::Conflict {
                state_id,
                expected,
                actual,
            } => CycleError::Conflict {
                state_id,
                expected,
                actual,
            },
            source => CycleError::Backend { phase, source },
        }
    }
}

/// Result of a successful coordination cycle
#[derive(Debug)]
pub struct CycleReport {
    pub state_id: String,
    pub operation: String,
    /// Serial of the snapshot that was written
    pub serial: u64,
    /// Version token the store assigned to the write
    pub version: Version,
    /// True when this cycle created the very first snapshot
    pub first_run: bool,
    /// The snapshot as written
    pub snapshot: Snapshot,
}

/// Orchestrates coordination cycles for one state identifier
pub struct Coordinator {
    store: Box<dyn ObjectStore>,
    locks: Box<dyn LockTable>,
    state_id: String,
}

impl Coordinator {
    pub fn new(
        store: Box<dyn ObjectStore>,
        locks: Box<dyn LockTable>,
        state_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            locks,
            state_id: state_id.into(),
        }
    }

    pub fn state_id(&self) -> &str {
        &self.state_id
    }

    /// Read the latest snapshot without locking (for plan/show)
    pub async fn read_current(&self) -> Result<Option<(Snapshot, Version)>, CycleError> {
        self.store
            .read_latest(&self.state_id)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Reading, e))
    }

    /// Read the current lock record, if any
    pub async fn read_lock(&self) -> Result<Option<LockRecord>, CycleError> {
        self.locks
            .read_lock(&self.state_id)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Reading, e))
    }

    /// Force release an abandoned lock by its holder token
    pub async fn force_unlock(&self, holder_id: &str) -> Result<(), CycleError> {
        self.locks
            .force_unlock(&self.state_id, holder_id)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Releasing, e))
    }

    /// Bootstrap the backend and write the initial snapshot if none exists
    ///
    /// Returns true when a fresh snapshot was created.
    pub async fn ensure_initialized(&self) -> Result<bool, CycleError> {
        self.store
            .init()
            .await
            .map_err(|e| CycleError::from_backend(Phase::Idle, e))?;
        self.locks
            .init()
            .await
            .map_err(|e| CycleError::from_backend(Phase::Idle, e))?;

        let lock = LockRecord::new(&self.state_id, "init");
        self.locks
            .acquire(&self.state_id, &lock)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Locking, e))?;

        let outcome = self.write_initial().await;

        match self.locks.release(&self.state_id, &lock).await {
            Ok(()) => outcome,
            Err(source) => Err(CycleError::ReleaseFailed {
                lock,
                source,
                underlying: outcome.err().map(Box::new),
            }),
        }
    }

    async fn write_initial(&self) -> Result<bool, CycleError> {
        let existing = self
            .store
            .read_latest(&self.state_id)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Reading, e))?;

        if existing.is_some() {
            return Ok(false);
        }

        let mut snapshot = Snapshot::new();
        snapshot.increment_serial();
        self.store
            .write_if_version_matches(&self.state_id, &snapshot, None)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Writing, e))?;

        Ok(true)
    }

    /// Run one coordination cycle
    ///
    /// Never proceeds without the lock; never retries a conflict; always
    /// attempts release, even when planning or the write failed.
    pub async fn run_cycle(
        &self,
        operation: &str,
        engine: &dyn PlanningEngine,
        descriptors: &[Descriptor],
    ) -> Result<CycleReport, CycleError> {
        // Locking
        let lock = LockRecord::new(&self.state_id, operation);
        self.locks
            .acquire(&self.state_id, &lock)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Locking, e))?;

        // Locked; release must now run on every exit path
        let outcome = self.locked_cycle(operation, engine, descriptors).await;

        // Releasing
        match self.locks.release(&self.state_id, &lock).await {
            Ok(()) => outcome,
            Err(source) => Err(CycleError::ReleaseFailed {
                lock,
                source,
                underlying: outcome.err().map(Box::new),
            }),
        }
    }

    async fn locked_cycle(
        &self,
        operation: &str,
        engine: &dyn PlanningEngine,
        descriptors: &[Descriptor],
    ) -> Result<CycleReport, CycleError> {
        // Reading; a missing snapshot is a valid first run
        let read = self
            .store
            .read_latest(&self.state_id)
            .await
            .map_err(|e| CycleError::from_backend(Phase::Reading, e))?;

        let first_run = read.is_none();
        let (current, expected) = match read {
            Some((snapshot, version)) => (snapshot, Some(version)),
            None => (Snapshot::new(), None),
        };

        // Planning (opaque to the protocol)
        let mut next = engine.plan(&current, descriptors).await?;

        if next.lineage != current.lineage {
            return Err(CycleError::Lineage {
                expected: current.lineage,
                actual: next.lineage,
            });
        }

        // Writing, conditioned on the version read above
        next.serial = current.serial;
        next.increment_serial();

        let version = self
            .store
            .write_if_version_matches(&self.state_id, &next, expected.as_ref())
            .await
            .map_err(|e| CycleError::from_backend(Phase::Writing, e))?;

        Ok(CycleReport {
            state_id: self.state_id.clone(),
            operation: operation.to_string(),
            serial: next.serial,
            version,
            first_run,
            snapshot: next,
        })
    }
}
