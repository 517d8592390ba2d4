//! Graph - Dependency ordering over descriptor references
//!
//! References between descriptors form a directed acyclic graph. The graph
//! is resolved statically and in full before any planning happens; a cycle
//! or a reference to an unknown binding is a hard error.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::descriptor::Descriptor;

/// Binding name reserved for stack configuration values
pub const CONFIG_BINDING: &str = "config";

/// Error building or ordering the dependency graph
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Descriptor '{referenced_by}' references unknown binding '{binding}'")]
    UnknownBinding {
        binding: String,
        referenced_by: String,
    },

    #[error("Duplicate binding '{0}'")]
    DuplicateBinding(String),
}

/// Dependency graph over descriptor bindings
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Binding -> bindings it depends on
    edges: HashMap<String, Vec<String>>,
    /// Bindings in declaration order
    bindings: Vec<String>,
}

impl DependencyGraph {
    /// Build the graph from a descriptor list
    ///
    /// References to the reserved `config` binding are not edges; they are
    /// satisfied by the stack configuration, not by another descriptor.
    pub fn build(descriptors: &[Descriptor]) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        let mut known: HashSet<&str> = HashSet::new();

        for descriptor in descriptors {
            let binding = descriptor.binding();
            if !known.insert(binding) {
                return Err(GraphError::DuplicateBinding(binding.to_string()));
            }
            graph.bindings.push(binding.to_string());
        }

        for descriptor in descriptors {
            let binding = descriptor.binding();
            let mut deps = Vec::new();
            for reference in descriptor.references() {
                if reference.binding == CONFIG_BINDING {
                    continue;
                }
                if !known.contains(reference.binding.as_str()) {
                    return Err(GraphError::UnknownBinding {
                        binding: reference.binding,
                        referenced_by: binding.to_string(),
                    });
                }
                if !deps.contains(&reference.binding) {
                    deps.push(reference.binding);
                }
            }
            graph.edges.insert(binding.to_string(), deps);
        }

        Ok(graph)
    }

    /// Bindings a descriptor depends on
    pub fn dependencies_of(&self, binding: &str) -> &[String] {
        self.edges.get(binding).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological order: dependencies before dependents
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut sorted = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut visiting: Vec<String> = Vec::new();

        for binding in &self.bindings {
            self.visit(binding, &mut visited, &mut visiting, &mut sorted)?;
        }

        Ok(sorted)
    }

    fn visit(
        &self,
        binding: &str,
        visited: &mut HashSet<String>,
        visiting: &mut Vec<String>,
        sorted: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(binding) {
            return Ok(());
        }
        if let Some(pos) = visiting.iter().position(|b| b == binding) {
            let mut path: Vec<String> = visiting[pos..].to_vec();
            path.push(binding.to_string());
            return Err(GraphError::Cycle { path });
        }

        visiting.push(binding.to_string());
        for dep in self.dependencies_of(binding).to_vec() {
            self.visit(&dep, visited, visiting, sorted)?;
        }
        visiting.pop();

        visited.insert(binding.to_string());
        sorted.push(binding.to_string());
        Ok(())
    }
}

/// Sort descriptors so that dependencies come before dependents
pub fn sort_by_dependencies(descriptors: &[Descriptor]) -> Result<Vec<Descriptor>, GraphError> {
    let graph = DependencyGraph::build(descriptors)?;
    let order = graph.topological_order()?;

    let by_binding: HashMap<&str, &Descriptor> =
        descriptors.iter().map(|d| (d.binding(), d)).collect();

    Ok(order
        .iter()
        .filter_map(|b| by_binding.get(b.as_str()).map(|d| (*d).clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Value;

    fn service_stack() -> Vec<Descriptor> {
        vec![
            Descriptor::new("ecs.service", "app")
                .with_binding("service")
                .with_attribute("cluster", Value::String("${cluster.name}".to_string()))
                .with_attribute(
                    "task_definition",
                    Value::String("${task.family}".to_string()),
                ),
            Descriptor::new("ecs.cluster", "app-cluster").with_binding("cluster"),
            Descriptor::new("ecs.task_definition", "app")
                .with_binding("task")
                .with_attribute("image", Value::String("${repo.url}:latest".to_string())),
            Descriptor::new("ecr.repository", "app").with_binding("repo"),
        ]
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let descriptors = service_stack();
        let sorted = sort_by_dependencies(&descriptors).unwrap();

        let position = |binding: &str| {
            sorted
                .iter()
                .position(|d| d.binding() == binding)
                .unwrap()
        };

        assert!(position("repo") < position("task"));
        assert!(position("task") < position("service"));
        assert!(position("cluster") < position("service"));
    }

    #[test]
    fn config_references_are_not_edges() {
        let descriptors = vec![
            Descriptor::new("ecs.cluster", "main")
                .with_attribute("name", Value::String("${config.project}-cluster".to_string())),
        ];

        let graph = DependencyGraph::build(&descriptors).unwrap();
        assert!(graph.dependencies_of("main").is_empty());
    }

    #[test]
    fn unknown_binding_is_an_error() {
        let descriptors = vec![
            Descriptor::new("ecs.service", "app")
                .with_attribute("cluster", Value::String("${nowhere.name}".to_string())),
        ];

        let err = DependencyGraph::build(&descriptors).unwrap_err();
        assert!(matches!(err, GraphError::UnknownBinding { .. }));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let descriptors = vec![
            Descriptor::new("a.kind", "a")
                .with_attribute("x", Value::String("${b.y}".to_string())),
            Descriptor::new("b.kind", "b")
                .with_attribute("y", Value::String("${a.x}".to_string())),
        ];

        let graph = DependencyGraph::build(&descriptors).unwrap();
        let err = graph.topological_order().unwrap_err();
        match err {
            GraphError::Cycle { path } => {
                assert!(path.len() >= 3);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("Expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_binding_is_an_error() {
        let descriptors = vec![
            Descriptor::new("ecs.cluster", "app").with_binding("x"),
            Descriptor::new("ecr.repository", "app").with_binding("x"),
        ];

        let err = DependencyGraph::build(&descriptors).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateBinding(_)));
    }
}
