//! Catalog - Descriptor schemas for the supported resource kinds
//!
//! One schema per kind the stack file may declare. Kinds not present in the
//! catalog are passed through to the planning engine unvalidated.

use crate::schema::{AttributeSchema, AttributeType, DescriptorSchema, types};

/// Returns the schema for ECR repositories
pub fn ecr_repository_schema() -> DescriptorSchema {
    DescriptorSchema::new("ecr.repository")
        .with_description("A container image repository")
        .attribute(
            AttributeSchema::new(
                "image_tag_mutability",
                AttributeType::Enum(vec!["MUTABLE".to_string(), "IMMUTABLE".to_string()]),
            )
            .with_description("Whether image tags can be overwritten"),
        )
        .attribute(
            AttributeSchema::new("scan_on_push", AttributeType::Bool)
                .with_description("Scan images for vulnerabilities on push"),
        )
        .attribute(
            AttributeSchema::new("force_delete", AttributeType::Bool)
                .with_description("Allow deletion even when images are present"),
        )
}

/// Returns the schema for ECS clusters
pub fn ecs_cluster_schema() -> DescriptorSchema {
    DescriptorSchema::new("ecs.cluster")
        .with_description("A cluster for running containerized tasks")
        .attribute(
            AttributeSchema::new("container_insights", AttributeType::Bool)
                .with_description("Enable container-level monitoring"),
        )
}

/// Returns the schema for ECS task definitions
pub fn ecs_task_definition_schema() -> DescriptorSchema {
    DescriptorSchema::new("ecs.task_definition")
        .with_description("A versioned template describing how to run a container")
        .attribute(
            AttributeSchema::new("family", AttributeType::String)
                .required()
                .with_description("Family name grouping task definition revisions"),
        )
        .attribute(
            AttributeSchema::new("cpu", types::positive_int())
                .with_description("CPU units reserved for the task"),
        )
        .attribute(
            AttributeSchema::new("memory", types::positive_int())
                .with_description("Memory (MiB) reserved for the task"),
        )
        .attribute(
            AttributeSchema::new(
                "network_mode",
                AttributeType::Enum(vec![
                    "awsvpc".to_string(),
                    "bridge".to_string(),
                    "host".to_string(),
                ]),
            )
            .with_description("Networking mode for containers in the task"),
        )
        .attribute(
            AttributeSchema::new("execution_role_arn", AttributeType::String)
                .with_description("Role the platform assumes to pull images and write logs"),
        )
        .attribute(
            AttributeSchema::new("image", AttributeType::String)
                .required()
                .with_description("Container image URL"),
        )
        .attribute(
            AttributeSchema::new("container_name", AttributeType::String)
                .with_description("Name of the main container"),
        )
        .attribute(
            AttributeSchema::new("container_port", types::port())
                .with_description("Port the container listens on"),
        )
}

/// Returns the schema for ECS services
pub fn ecs_service_schema() -> DescriptorSchema {
    DescriptorSchema::new("ecs.service")
        .with_description("A long-running set of tasks kept at a desired count")
        .attribute(
            AttributeSchema::new("cluster", AttributeType::String)
                .required()
                .with_description("Cluster the service runs in"),
        )
        .attribute(
            AttributeSchema::new("task_definition", AttributeType::String)
                .required()
                .with_description("Task definition family the service runs"),
        )
        .attribute(
            AttributeSchema::new("desired_count", types::positive_int())
                .with_description("Number of task copies to keep running"),
        )
        .attribute(
            AttributeSchema::new(
                "launch_type",
                AttributeType::Enum(vec!["FARGATE".to_string(), "EC2".to_string()]),
            )
            .with_description("Compute capacity the tasks are placed on"),
        )
        .attribute(
            AttributeSchema::new("subnets", AttributeType::List(Box::new(AttributeType::String)))
                .with_description("Subnets the tasks are placed in"),
        )
        .attribute(
            AttributeSchema::new(
                "security_groups",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .with_description("Security groups attached to the tasks"),
        )
        .attribute(
            AttributeSchema::new("assign_public_ip", AttributeType::Bool)
                .with_description("Assign a public IP to each task"),
        )
        .attribute(
            AttributeSchema::new("target_group_arn", AttributeType::String)
                .with_description("Target group the tasks register with"),
        )
        .attribute(
            AttributeSchema::new("container_name", AttributeType::String)
                .with_description("Container receiving load balancer traffic"),
        )
        .attribute(
            AttributeSchema::new("container_port", types::port())
                .with_description("Container port receiving load balancer traffic"),
        )
}

/// Returns the schema for load balancers
pub fn load_balancer_schema() -> DescriptorSchema {
    DescriptorSchema::new("elb.load_balancer")
        .with_description("A load balancer distributing traffic to targets")
        .attribute(
            AttributeSchema::new(
                "scheme",
                AttributeType::Enum(vec!["internet-facing".to_string(), "internal".to_string()]),
            )
            .with_description("Whether the load balancer is reachable from the internet"),
        )
        .attribute(
            AttributeSchema::new(
                "lb_type",
                AttributeType::Enum(vec!["application".to_string(), "network".to_string()]),
            )
            .with_description("Load balancer type"),
        )
        .attribute(
            AttributeSchema::new("subnets", AttributeType::List(Box::new(AttributeType::String)))
                .required()
                .with_description("Subnets the load balancer spans"),
        )
        .attribute(
            AttributeSchema::new(
                "security_groups",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .with_description("Security groups attached to the load balancer"),
        )
        .attribute(
            AttributeSchema::new("listener_port", types::port())
                .with_description("Port the listener accepts traffic on"),
        )
}

/// Returns the schema for target groups
pub fn target_group_schema() -> DescriptorSchema {
    DescriptorSchema::new("elb.target_group")
        .with_description("A group of targets a load balancer routes to")
        .attribute(
            AttributeSchema::new("port", types::port())
                .required()
                .with_description("Port targets receive traffic on"),
        )
        .attribute(
            AttributeSchema::new(
                "protocol",
                AttributeType::Enum(vec![
                    "HTTP".to_string(),
                    "HTTPS".to_string(),
                    "TCP".to_string(),
                ]),
            )
            .with_description("Protocol used to route traffic"),
        )
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .required()
                .with_description("VPC the targets live in"),
        )
        .attribute(
            AttributeSchema::new(
                "target_type",
                AttributeType::Enum(vec!["ip".to_string(), "instance".to_string()]),
            )
            .with_description("How targets are registered"),
        )
        .attribute(
            AttributeSchema::new("health_check_path", AttributeType::String)
                .with_description("HTTP path probed for target health"),
        )
}

/// Returns the schema for security groups
pub fn security_group_schema() -> DescriptorSchema {
    DescriptorSchema::new("ec2.security_group")
        .with_description("A stateful firewall for network interfaces")
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .with_description("Human-readable purpose of the group"),
        )
        .attribute(
            AttributeSchema::new("vpc_id", AttributeType::String)
                .with_description("VPC the group belongs to"),
        )
        .attribute(
            AttributeSchema::new("ingress_cidr", types::cidr())
                .with_description("CIDR range allowed inbound"),
        )
        .attribute(
            AttributeSchema::new("ingress_port", types::port())
                .with_description("Port allowed inbound"),
        )
        .attribute(
            AttributeSchema::new("allow_all_egress", AttributeType::Bool)
                .with_description("Allow all outbound traffic"),
        )
}

/// Returns the schema for IAM roles
pub fn iam_role_schema() -> DescriptorSchema {
    DescriptorSchema::new("iam.role")
        .with_description("An identity other services assume to act on your behalf")
        .attribute(
            AttributeSchema::new("assume_role_service", AttributeType::String)
                .required()
                .with_description("Service principal allowed to assume the role"),
        )
        .attribute(
            AttributeSchema::new(
                "managed_policy_arns",
                AttributeType::List(Box::new(AttributeType::String)),
            )
            .with_description("Managed policies attached to the role"),
        )
        .attribute(
            AttributeSchema::new("description", AttributeType::String)
                .with_description("Human-readable purpose of the role"),
        )
}

/// Returns all catalog schemas
pub fn all_schemas() -> Vec<DescriptorSchema> {
    vec![
        ecr_repository_schema(),
        ecs_cluster_schema(),
        ecs_task_definition_schema(),
        ecs_service_schema(),
        load_balancer_schema(),
        target_group_schema(),
        security_group_schema(),
        iam_role_schema(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Value;
    use std::collections::HashMap;

    #[test]
    fn valid_task_definition() {
        let schema = ecs_task_definition_schema();
        let mut attrs = HashMap::new();
        attrs.insert("family".to_string(), Value::String("app".to_string()));
        attrs.insert(
            "image".to_string(),
            Value::String("${repo.url}:latest".to_string()),
        );
        attrs.insert("cpu".to_string(), Value::Int(256));
        attrs.insert("memory".to_string(), Value::Int(512));
        attrs.insert("network_mode".to_string(), Value::String("awsvpc".to_string()));

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn task_definition_missing_family() {
        let schema = ecs_task_definition_schema();
        let mut attrs = HashMap::new();
        attrs.insert("image".to_string(), Value::String("nginx:latest".to_string()));

        let errors = schema.validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn invalid_launch_type() {
        let schema = ecs_service_schema();
        let mut attrs = HashMap::new();
        attrs.insert("cluster".to_string(), Value::String("app".to_string()));
        attrs.insert(
            "task_definition".to_string(),
            Value::String("app".to_string()),
        );
        attrs.insert("launch_type".to_string(), Value::String("LAMBDA".to_string()));

        assert!(schema.validate(&attrs).is_err());
    }

    #[test]
    fn valid_target_group() {
        let schema = target_group_schema();
        let mut attrs = HashMap::new();
        attrs.insert("port".to_string(), Value::Int(8080));
        attrs.insert("protocol".to_string(), Value::String("HTTP".to_string()));
        attrs.insert("vpc_id".to_string(), Value::String("vpc-0a1b2c".to_string()));
        attrs.insert("target_type".to_string(), Value::String("ip".to_string()));

        assert!(schema.validate(&attrs).is_ok());
    }

    #[test]
    fn all_schemas_have_distinct_kinds() {
        let schemas = all_schemas();
        let mut kinds: Vec<&str> = schemas.iter().map(|s| s.kind.as_str()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), schemas.len());
    }
}
