//! Changes - Compare desired descriptors with snapshot records
//!
//! Compares the desired state declared in the stack file with the records in
//! the current snapshot and produces the set of changes a cycle would write.

use std::collections::HashMap;

use crate::descriptor::DescriptorId;

/// A desired record: a descriptor with its attributes fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredRecord {
    pub id: DescriptorId,
    pub attributes: HashMap<String, serde_json::Value>,
}

/// One change between desired and current state
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Record does not exist -> will be created
    Create(DescriptorId),
    /// Record exists with differences -> will be updated
    Update {
        id: DescriptorId,
        changed_attributes: Vec<String>,
    },
    /// Record exists with no differences
    NoChange(DescriptorId),
    /// Record exists but is no longer desired -> will be removed
    Delete(DescriptorId),
}

impl Change {
    /// Returns whether this change mutates the snapshot
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Change::NoChange(_))
    }

    pub fn id(&self) -> &DescriptorId {
        match self {
            Change::Create(id)
            | Change::NoChange(id)
            | Change::Delete(id)
            | Change::Update { id, .. } => id,
        }
    }
}

/// The full set of changes for one cycle
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: Vec<Change>,
}

impl ChangeSet {
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// True when no change mutates the snapshot
    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|c| !c.is_mutation())
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change {
                Change::Create(_) => summary.create += 1,
                Change::Update { .. } => summary.update += 1,
                Change::Delete(_) => summary.delete += 1,
                Change::NoChange(_) => summary.unchanged += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to delete",
            self.create, self.update, self.delete
        )
    }
}

/// Find changed attributes between desired and current attribute maps
fn find_changed_attributes(
    desired: &HashMap<String, serde_json::Value>,
    current: &HashMap<String, serde_json::Value>,
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') {
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

/// Compute the change set for a cycle
///
/// Records present in the snapshot but absent from the desired set are
/// deletions; a destroy cycle is the degenerate case of an empty desired set.
pub fn compute_changes(
    desired: &[DesiredRecord],
    current: &HashMap<DescriptorId, HashMap<String, serde_json::Value>>,
) -> ChangeSet {
    let mut changes = Vec::new();

    for record in desired {
        match current.get(&record.id) {
            None => changes.push(Change::Create(record.id.clone())),
            Some(current_attrs) => {
                let changed = find_changed_attributes(&record.attributes, current_attrs);
                if changed.is_empty() {
                    changes.push(Change::NoChange(record.id.clone()));
                } else {
                    changes.push(Change::Update {
                        id: record.id.clone(),
                        changed_attributes: changed,
                    });
                }
            }
        }
    }

    let mut deleted: Vec<&DescriptorId> = current
        .keys()
        .filter(|id| !desired.iter().any(|d| d.id == **id))
        .collect();
    deleted.sort_by(|a, b| (&a.kind, &a.name).cmp(&(&b.kind, &b.name)));
    changes.extend(deleted.into_iter().map(|id| Change::Delete(id.clone())));

    ChangeSet { changes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn create_when_record_absent() {
        let desired = vec![DesiredRecord {
            id: DescriptorId::new("ecr.repository", "app"),
            attributes: attrs(&[("scan_on_push", json!(true))]),
        }];

        let set = compute_changes(&desired, &HashMap::new());
        assert_eq!(set.changes().len(), 1);
        assert!(matches!(set.changes()[0], Change::Create(_)));
        assert!(!set.is_empty());
    }

    #[test]
    fn no_change_when_attributes_match() {
        let id = DescriptorId::new("ecs.cluster", "main");
        let desired = vec![DesiredRecord {
            id: id.clone(),
            attributes: attrs(&[("container_insights", json!(true))]),
        }];
        let mut current = HashMap::new();
        current.insert(id, attrs(&[("container_insights", json!(true))]));

        let set = compute_changes(&desired, &current);
        assert!(matches!(set.changes()[0], Change::NoChange(_)));
        assert!(set.is_empty());
    }

    #[test]
    fn update_reports_changed_attributes() {
        let id = DescriptorId::new("ecs.service", "app");
        let desired = vec![DesiredRecord {
            id: id.clone(),
            attributes: attrs(&[("desired_count", json!(3)), ("launch_type", json!("FARGATE"))]),
        }];
        let mut current = HashMap::new();
        current.insert(
            id,
            attrs(&[("desired_count", json!(1)), ("launch_type", json!("FARGATE"))]),
        );

        let set = compute_changes(&desired, &current);
        match &set.changes()[0] {
            Change::Update {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, &vec!["desired_count".to_string()]),
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn internal_attributes_are_skipped() {
        let id = DescriptorId::new("ecs.cluster", "main");
        let desired = vec![DesiredRecord {
            id: id.clone(),
            attributes: attrs(&[("_binding", json!("cluster"))]),
        }];
        let mut current = HashMap::new();
        current.insert(id, HashMap::new());

        let set = compute_changes(&desired, &current);
        assert!(matches!(set.changes()[0], Change::NoChange(_)));
    }

    #[test]
    fn undesired_records_are_deleted() {
        let mut current = HashMap::new();
        current.insert(DescriptorId::new("ecr.repository", "old"), HashMap::new());
        current.insert(DescriptorId::new("ecs.cluster", "old"), HashMap::new());

        let set = compute_changes(&[], &current);
        assert_eq!(set.summary().delete, 2);
        assert!(set.changes().iter().all(|c| matches!(c, Change::Delete(_))));
    }

    #[test]
    fn summary_display() {
        let mut current = HashMap::new();
        current.insert(DescriptorId::new("ecs.cluster", "old"), HashMap::new());

        let desired = vec![DesiredRecord {
            id: DescriptorId::new("ecr.repository", "app"),
            attributes: HashMap::new(),
        }];

        let summary = compute_changes(&desired, &current).summary();
        assert_eq!(
            summary.to_string(),
            "Plan: 1 to create, 0 to update, 1 to delete"
        );
    }
}
