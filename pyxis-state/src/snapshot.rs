//! Snapshot document persisted to the object store

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use pyxis_core::descriptor::DescriptorId;

/// The snapshot document: the full infrastructure state at a point in time
///
/// Mutated only by full-replace writes; the object store keys it by the
/// state identifier and owns its version token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Monotonically increasing number for each state modification
    pub serial: u64,
    /// Unique identifier for this state lineage (prevents accidental overwrites)
    pub lineage: String,
    /// Version of Pyxis that last modified this snapshot
    pub tool_version: String,
    /// All records and their current state
    pub records: Vec<RecordState>,
}

impl Snapshot {
    /// Current snapshot format version
    pub const CURRENT_FORMAT_VERSION: u32 = 1;

    /// Create a new empty snapshot with a fresh lineage
    pub fn new() -> Self {
        Self::with_lineage(uuid::Uuid::new_v4().to_string())
    }

    /// Create a new snapshot with a specific lineage
    pub fn with_lineage(lineage: String) -> Self {
        Self {
            format_version: Self::CURRENT_FORMAT_VERSION,
            serial: 0,
            lineage,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            records: Vec::new(),
        }
    }

    /// Increment serial and update the tool version for a new write
    pub fn increment_serial(&mut self) {
        self.serial += 1;
        self.tool_version = env!("CARGO_PKG_VERSION").to_string();
    }

    /// Find a record by kind and name
    pub fn find_record(&self, kind: &str, name: &str) -> Option<&RecordState> {
        self.records
            .iter()
            .find(|r| r.kind == kind && r.name == name)
    }

    /// Add or update a record
    pub fn upsert_record(&mut self, record: RecordState) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.kind == record.kind && r.name == record.name)
        {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    /// Remove a record, returning it if present
    pub fn remove_record(&mut self, kind: &str, name: &str) -> Option<RecordState> {
        self.records
            .iter()
            .position(|r| r.kind == kind && r.name == name)
            .map(|pos| self.records.remove(pos))
    }

    /// Records keyed by descriptor identifier, for change computation
    pub fn record_map(&self) -> HashMap<DescriptorId, HashMap<String, serde_json::Value>> {
        self.records
            .iter()
            .map(|r| {
                (
                    DescriptorId::new(r.kind.clone(), r.name.clone()),
                    r.attributes.clone(),
                )
            })
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a single record in the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    /// Descriptor kind (e.g., "ecs.service")
    pub kind: String,
    /// Descriptor name
    pub name: String,
    /// All attributes as JSON values
    pub attributes: HashMap<String, serde_json::Value>,
}

impl RecordState {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
