//! Lock record for mutual exclusion on a state identifier
//!
//! One lock record may exist per state identifier at any time; that is the
//! whole concurrency guarantee. The record carries no expiry: a holder that
//! loses connectivity keeps the lock until it releases it or an operator
//! force-unlocks. Staleness policy belongs to the deployment, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lock record held by one operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique holder token for this acquisition
    pub id: String,
    /// The state identifier this lock protects
    pub state_id: String,
    /// The operation being performed (e.g., "apply", "destroy", "init")
    pub operation: String,
    /// Who acquired the lock (username@hostname)
    pub who: String,
    /// When the lock was acquired
    pub created: DateTime<Utc>,
}

impl LockRecord {
    /// Create a new lock record for an operation
    pub fn new(state_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state_id: state_id.into(),
            operation: operation.into(),
            who: lock_owner(),
            created: Utc::now(),
        }
    }
}

/// The lock owner string (username@hostname)
fn lock_owner() -> String {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}@{}", username, hostname)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lock_record() {
        let lock = LockRecord::new("orbit/dev", "apply");
        assert_eq!(lock.state_id, "orbit/dev");
        assert_eq!(lock.operation, "apply");
        assert!(!lock.id.is_empty());
        assert!(lock.who.contains('@'));
    }

    #[test]
    fn holder_tokens_are_unique() {
        let a = LockRecord::new("orbit/dev", "apply");
        let b = LockRecord::new("orbit/dev", "apply");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serialization_round_trip() {
        let lock = LockRecord::new("orbit/dev", "destroy");
        let json = serde_json::to_string_pretty(&lock).unwrap();
        let back: LockRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, lock);
    }
}
