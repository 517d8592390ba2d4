//! Backend implementations for snapshot storage and locking

mod dynamodb;
mod local;
mod s3;

pub use dynamodb::DynamoLockTable;
pub use local::{DEFAULT_STATE_DIR, LocalLockTable, LocalObjectStore};
pub use s3::S3ObjectStore;

use crate::backend::{BackendConfig, BackendError, BackendResult, LockTable, ObjectStore};

/// The paired clients a backend provides
pub struct RemoteState {
    pub store: Box<dyn ObjectStore>,
    pub locks: Box<dyn LockTable>,
}

/// Create a backend from configuration
///
/// This function dispatches to the appropriate implementations based on the
/// backend_type in the configuration. The "s3" backend pairs an S3 object
/// store with a DynamoDB lock table; "local" pairs both over one state
/// directory.
pub async fn create_backend(config: &BackendConfig) -> BackendResult<RemoteState> {
    match config.backend_type.as_str() {
        "s3" => {
            let store = S3ObjectStore::from_config(config).await?;
            let locks = DynamoLockTable::from_config(config).await?;
            Ok(RemoteState {
                store: Box::new(store),
                locks: Box::new(locks),
            })
        }
        "local" => {
            let store = LocalObjectStore::from_config(config)?;
            let locks = LocalLockTable::from_config(config)?;
            Ok(RemoteState {
                store: Box::new(store),
                locks: Box::new(locks),
            })
        }
        other => Err(BackendError::unsupported_backend(other)),
    }
}
