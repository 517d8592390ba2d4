//! Planning engine seam
//!
//! The coordinator hands the current snapshot and the descriptor list to a
//! planning engine and writes back whatever snapshot it returns. The engine
//! is opaque to the coordination protocol; `ProjectionEngine` is the one
//! shipped here.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use pyxis_core::changes::DesiredRecord;
use pyxis_core::descriptor::{Descriptor, Value, ValueError};
use pyxis_core::graph::GraphError;

use crate::snapshot::{RecordState, Snapshot};

/// Error computing the next snapshot
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ValueError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

/// Computes the next desired snapshot from the current one
///
/// `plan` must carry the current snapshot's lineage forward; the coordinator
/// rejects output with a different lineage.
#[async_trait]
pub trait PlanningEngine: Send + Sync {
    async fn plan(
        &self,
        current: &Snapshot,
        descriptors: &[Descriptor],
    ) -> Result<Snapshot, PlanningError>;
}

/// Resolve descriptors in dependency order into desired records
///
/// Each descriptor's resolved attributes become visible to its dependents
/// under its binding name, along with the implicit `name` and `kind`
/// attributes.
pub fn resolve_desired(
    seed_bindings: &HashMap<String, HashMap<String, Value>>,
    descriptors: &[Descriptor],
) -> Result<Vec<DesiredRecord>, PlanningError> {
    let sorted = pyxis_core::graph::sort_by_dependencies(descriptors)?;

    let mut bindings = seed_bindings.clone();
    let mut desired = Vec::new();

    for descriptor in &sorted {
        let resolved = descriptor.resolve_attributes(&bindings)?;

        let mut exposed = HashMap::new();
        exposed.insert("name".to_string(), Value::String(descriptor.id.name.clone()));
        exposed.insert("kind".to_string(), Value::String(descriptor.id.kind.clone()));
        exposed.extend(resolved.clone());
        bindings.insert(descriptor.binding().to_string(), exposed);

        let mut attributes = HashMap::new();
        for (key, value) in resolved {
            let json = serde_json::to_value(&value)
                .map_err(|e| PlanningError::Serialization(e.to_string()))?;
            attributes.insert(key, json);
        }

        desired.push(DesiredRecord {
            id: descriptor.id.clone(),
            attributes,
        });
    }

    Ok(desired)
}

/// The default engine: projects resolved descriptors into snapshot records
///
/// It performs no resource API calls; records absent from the descriptor
/// list simply drop out of the projected snapshot.
pub struct ProjectionEngine {
    seed_bindings: HashMap<String, HashMap<String, Value>>,
}

impl ProjectionEngine {
    pub fn new(seed_bindings: HashMap<String, HashMap<String, Value>>) -> Self {
        Self { seed_bindings }
    }
}

#[async_trait]
impl PlanningEngine for ProjectionEngine {
    async fn plan(
        &self,
        current: &Snapshot,
        descriptors: &[Descriptor],
    ) -> Result<Snapshot, PlanningError> {
        let desired = resolve_desired(&self.seed_bindings, descriptors)?;

        let mut next = Snapshot::with_lineage(current.lineage.clone());
        next.serial = current.serial;

        for record in desired {
            next.upsert_record(RecordState {
                kind: record.id.kind,
                name: record.id.name,
                attributes: record.attributes,
            });
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyxis_core::descriptor::DescriptorId;

    fn seed() -> HashMap<String, HashMap<String, Value>> {
        let mut config = HashMap::new();
        config.insert("project".to_string(), Value::String("orbit".to_string()));
        let mut bindings = HashMap::new();
        bindings.insert("config".to_string(), config);
        bindings
    }

    #[tokio::test]
    async fn projection_resolves_references_in_order() {
        let descriptors = vec![
            Descriptor::new("ecs.service", "app")
                .with_binding("service")
                .with_attribute("cluster", Value::String("${cluster.name}".to_string()))
                .with_attribute(
                    "desired_count",
                    Value::String("${config.app_count}".to_string()),
                ),
            Descriptor::new("ecs.cluster", "main").with_binding("cluster"),
        ];

        let mut bindings = seed();
        bindings
            .get_mut("config")
            .unwrap()
            .insert("app_count".to_string(), Value::Int(2));

        let engine = ProjectionEngine::new(bindings);
        let current = Snapshot::new();
        let next = engine.plan(&current, &descriptors).await.unwrap();

        assert_eq!(next.records.len(), 2);
        assert_eq!(next.lineage, current.lineage);

        let service = next.find_record("ecs.service", "app").unwrap();
        assert_eq!(
            service.attributes.get("cluster"),
            Some(&serde_json::json!("main"))
        );
        // Whole-string references keep the referenced value's type
        assert_eq!(
            service.attributes.get("desired_count"),
            Some(&serde_json::json!(2))
        );
    }

    #[tokio::test]
    async fn projection_carries_lineage_and_serial() {
        let mut current = Snapshot::new();
        current.serial = 7;

        let engine = ProjectionEngine::new(seed());
        let next = engine.plan(&current, &[]).await.unwrap();

        assert_eq!(next.lineage, current.lineage);
        assert_eq!(next.serial, 7);
        assert!(next.records.is_empty());
    }

    #[tokio::test]
    async fn unresolved_reference_fails_planning() {
        let descriptors = vec![
            Descriptor::new("ecs.service", "app")
                .with_attribute("cluster", Value::String("${missing.name}".to_string())),
        ];

        let engine = ProjectionEngine::new(seed());
        let result = engine.plan(&Snapshot::new(), &descriptors).await;
        assert!(matches!(result, Err(PlanningError::Graph(_))));
    }

    #[test]
    fn resolve_desired_exposes_name_to_dependents() {
        let descriptors = vec![
            Descriptor::new("ecs.cluster", "main").with_binding("cluster"),
            Descriptor::new("ecs.service", "app")
                .with_attribute("cluster", Value::String("${cluster.name}".to_string())),
        ];

        let desired = resolve_desired(&seed(), &descriptors).unwrap();
        let service = desired
            .iter()
            .find(|d| d.id == DescriptorId::new("ecs.service", "app"))
            .unwrap();

        assert_eq!(
            service.attributes.get("cluster"),
            Some(&serde_json::json!("main"))
        );
    }

    #[test]
    fn config_references_resolve_from_seed() {
        let descriptors = vec![
            Descriptor::new("ecr.repository", "app")
                .with_attribute("name", Value::String("${config.project}-app".to_string())),
        ];

        let desired = resolve_desired(&seed(), &descriptors).unwrap();
        assert_eq!(
            desired[0].attributes.get("name"),
            Some(&serde_json::json!("orbit-app"))
        );
    }
}
