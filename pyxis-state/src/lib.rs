//! Pyxis State Management
//!
//! This crate provides shared, lockable remote state for the Pyxis
//! infrastructure tool. Snapshots live in a durable object store with
//! versioned writes; mutual exclusion comes from a keyed lock table with
//! atomic conditional creates. The coordinator ties the two together into
//! one safe mutation cycle.
//!
//! # Overview
//!
//! The state layer consists of:
//!
//! - **Snapshot**: the versioned document holding all managed records
//! - **ObjectStore** / **LockTable**: traits for the two backend clients
//!   (S3 + DynamoDB remotely, plain files locally)
//! - **LockRecord**: who holds exclusive rights to mutate a state
//! - **Coordinator**: lock, read, plan, conditionally write, release
//!
//! # Example
//!
//! ```ignore
//! use pyxis_state::{BackendConfig, Coordinator, ProjectionEngine, create_backend};
//!
//! let backend = create_backend(&config).await?;
//! let coordinator = Coordinator::new(backend.store, backend.locks, "orbit/dev");
//!
//! // Lock, read, plan, write, release - or fail without touching state
//! let engine = ProjectionEngine::new(stack.seed_bindings());
//! let report = coordinator.run_cycle("apply", &engine, &stack.descriptors).await?;
//! println!("wrote serial {}", report.serial);
//! ```

pub mod backend;
pub mod backends;
pub mod coordinator;
pub mod engine;
pub mod lock;
pub mod snapshot;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, LockTable, ObjectStore, Version};
pub use backends::{RemoteState, create_backend};
pub use coordinator::{Coordinator, CycleError, CycleReport, Phase};
pub use engine::{PlanningEngine, PlanningError, ProjectionEngine, resolve_desired};
pub use lock::LockRecord;
pub use snapshot::{RecordState, Snapshot};
