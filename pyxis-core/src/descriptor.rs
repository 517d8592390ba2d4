//! Descriptor - Declarative records for external resources
//!
//! A Descriptor is a declarative, idempotent-intent record describing one
//! external resource (an ECR repository, an ECS service, a load balancer, ...).
//! Descriptors are passed through to the planning engine opaquely; the core
//! never calls the APIs they describe.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique identifier for a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DescriptorId {
    /// Descriptor kind (e.g., "ecs.service", "ecr.repository")
    pub kind: String,
    /// Descriptor name
    pub name: String,
}

impl DescriptorId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// Attribute value of a descriptor
///
/// Strings may contain `${binding.attribute}` interpolations referencing
/// another descriptor's attributes (or the reserved `config` binding).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    /// Collect all `${binding.attribute}` references contained in this value
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut Vec<Reference>) {
        match self {
            Value::String(s) => refs.extend(parse_references(s)),
            Value::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Value::Map(map) => {
                for v in map.values() {
                    v.collect_references(refs);
                }
            }
            Value::Bool(_) | Value::Int(_) => {}
        }
    }

    /// Returns true if this value contains any unresolved reference
    pub fn has_references(&self) -> bool {
        !self.references().is_empty()
    }

    /// Resolve all references against a binding map
    ///
    /// A string that is exactly one interpolation (`"${app_sg.id}"`) resolves
    /// to the referenced value with its type preserved; interpolations embedded
    /// in a longer string are substituted textually.
    pub fn resolve(
        &self,
        bindings: &HashMap<String, HashMap<String, Value>>,
    ) -> Result<Value, ValueError> {
        match self {
            Value::String(s) => resolve_string(s, bindings),
            Value::List(items) => {
                let resolved: Result<Vec<Value>, ValueError> =
                    items.iter().map(|v| v.resolve(bindings)).collect();
                Ok(Value::List(resolved?))
            }
            Value::Map(map) => {
                let mut resolved = HashMap::new();
                for (k, v) in map {
                    resolved.insert(k.clone(), v.resolve(bindings)?);
                }
                Ok(Value::Map(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    pub(crate) fn type_name(&self) -> String {
        match self {
            Value::Bool(_) => "Bool".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::String(_) => "String".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let parts: Vec<String> =
                    keys.iter().map(|k| format!("{}: {}", k, map[*k])).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Reference to another descriptor's attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Binding name of the referenced descriptor (e.g., "app_sg")
    pub binding: String,
    /// Attribute name being referenced (e.g., "id")
    pub attribute: String,
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.binding, self.attribute)
    }
}

/// Error resolving a value's references
#[derive(Debug, Clone, Error)]
pub enum ValueError {
    #[error("Unknown binding '{binding}' in reference ${{{binding}.{attribute}}}")]
    UnknownBinding { binding: String, attribute: String },

    #[error("Binding '{binding}' has no attribute '{attribute}'")]
    UnknownAttribute { binding: String, attribute: String },

    #[error("Malformed reference '{0}': expected ${{binding.attribute}}")]
    Malformed(String),
}

/// Desired state declared in the stack file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(flatten)]
    pub id: DescriptorId,
    /// Binding name other descriptors use to reference this one
    /// (defaults to the descriptor name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Descriptor {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DescriptorId::new(kind, name),
            binding: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = Some(binding.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// The name this descriptor is referenced by
    pub fn binding(&self) -> &str {
        self.binding.as_deref().unwrap_or(&self.id.name)
    }

    /// All references this descriptor makes to other bindings
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::new();
        for value in self.attributes.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Resolve all attribute references against a binding map
    pub fn resolve_attributes(
        &self,
        bindings: &HashMap<String, HashMap<String, Value>>,
    ) -> Result<HashMap<String, Value>, ValueError> {
        let mut resolved = HashMap::new();
        for (key, value) in &self.attributes {
            resolved.insert(key.clone(), value.resolve(bindings)?);
        }
        Ok(resolved)
    }
}

/// Parse all `${binding.attribute}` interpolations in a string
pub fn parse_references(s: &str) -> Vec<Reference> {
    let mut refs = Vec::new();
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let inner = &after[..end];
        if let Some((binding, attribute)) = inner.split_once('.') {
            if !binding.is_empty() && !attribute.is_empty() {
                refs.push(Reference {
                    binding: binding.to_string(),
                    attribute: attribute.to_string(),
                });
            }
        }
        rest = &after[end + 1..];
    }

    refs
}

/// Resolve interpolations in a single string value
fn resolve_string(
    s: &str,
    bindings: &HashMap<String, HashMap<String, Value>>,
) -> Result<Value, ValueError> {
    let refs = parse_references(s);
    if refs.is_empty() {
        return Ok(Value::String(s.to_string()));
    }

    // A whole-string reference keeps the referenced value's type
    if refs.len() == 1 {
        let r = &refs[0];
        if s == format!("${{{}.{}}}", r.binding, r.attribute) {
            return lookup(r, bindings).cloned();
        }
    }

    // Embedded references are substituted textually
    let mut result = s.to_string();
    for r in &refs {
        let value = lookup(r, bindings)?;
        result = result.replace(&r.to_string(), &value.to_string());
    }
    Ok(Value::String(result))
}

fn lookup<'a>(
    r: &Reference,
    bindings: &'a HashMap<String, HashMap<String, Value>>,
) -> Result<&'a Value, ValueError> {
    let attrs = bindings
        .get(&r.binding)
        .ok_or_else(|| ValueError::UnknownBinding {
            binding: r.binding.clone(),
            attribute: r.attribute.clone(),
        })?;
    attrs
        .get(&r.attribute)
        .ok_or_else(|| ValueError::UnknownAttribute {
            binding: r.binding.clone(),
            attribute: r.attribute.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_reference() {
        let refs = parse_references("${app_sg.id}");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].binding, "app_sg");
        assert_eq!(refs[0].attribute, "id");
    }

    #[test]
    fn parse_embedded_references() {
        let refs = parse_references("${config.project}-${config.environment}-app");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].binding, "config");
        assert_eq!(refs[1].attribute, "environment");
    }

    #[test]
    fn parse_ignores_plain_strings() {
        assert!(parse_references("no refs here").is_empty());
        assert!(parse_references("${malformed").is_empty());
        assert!(parse_references("${noattr}").is_empty());
    }

    #[test]
    fn resolve_whole_string_keeps_type() {
        let mut bindings = HashMap::new();
        let mut tg = HashMap::new();
        tg.insert("port".to_string(), Value::Int(8080));
        bindings.insert("app_tg".to_string(), tg);

        let value = Value::String("${app_tg.port}".to_string());
        let resolved = value.resolve(&bindings).unwrap();
        assert_eq!(resolved, Value::Int(8080));
    }

    #[test]
    fn resolve_embedded_substitutes_text() {
        let mut bindings = HashMap::new();
        let mut config = HashMap::new();
        config.insert("project".to_string(), Value::String("orbit".to_string()));
        bindings.insert("config".to_string(), config);

        let value = Value::String("${config.project}-cluster".to_string());
        let resolved = value.resolve(&bindings).unwrap();
        assert_eq!(resolved, Value::String("orbit-cluster".to_string()));
    }

    #[test]
    fn resolve_unknown_binding_fails() {
        let bindings = HashMap::new();
        let value = Value::String("${missing.id}".to_string());
        let err = value.resolve(&bindings).unwrap_err();
        assert!(matches!(err, ValueError::UnknownBinding { .. }));
    }

    #[test]
    fn resolve_nested_list_and_map() {
        let mut bindings = HashMap::new();
        let mut sg = HashMap::new();
        sg.insert("id".to_string(), Value::String("sg-123".to_string()));
        bindings.insert("app_sg".to_string(), sg);

        let value = Value::List(vec![Value::String("${app_sg.id}".to_string())]);
        let resolved = value.resolve(&bindings).unwrap();
        assert_eq!(
            resolved,
            Value::List(vec![Value::String("sg-123".to_string())])
        );
    }

    #[test]
    fn descriptor_binding_defaults_to_name() {
        let descriptor = Descriptor::new("ecs.cluster", "app-cluster");
        assert_eq!(descriptor.binding(), "app-cluster");

        let descriptor = descriptor.with_binding("cluster");
        assert_eq!(descriptor.binding(), "cluster");
    }

    #[test]
    fn descriptor_collects_references() {
        let descriptor = Descriptor::new("ecs.service", "app")
            .with_attribute("cluster", Value::String("${cluster.name}".to_string()))
            .with_attribute(
                "security_groups",
                Value::List(vec![Value::String("${app_sg.id}".to_string())]),
            );

        let refs = descriptor.references();
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn descriptor_serialization_round_trip() {
        let descriptor = Descriptor::new("ecr.repository", "app")
            .with_attribute("scan_on_push", Value::Bool(true))
            .with_attribute("image_tag_mutability", Value::String("MUTABLE".to_string()));

        let json = serde_json::to_string(&descriptor).unwrap();
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn value_untagged_deserialization() {
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Int(42));
        let v: Value = serde_json::from_str("\"8080\"").unwrap();
        assert_eq!(v, Value::String("8080".to_string()));
        let v: Value = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(v, Value::List(vec![Value::Int(1), Value::Int(2)]));
    }
}
