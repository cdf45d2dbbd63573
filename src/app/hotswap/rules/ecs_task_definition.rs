//! `AWS::ECS::TaskDefinition`: register a new revision and roll the services using it
//!
//! A task definition is immutable, so a change registers a new revision of the same family.
//! Every `AWS::ECS::Service` whose `TaskDefinition` is `Ref` to the changed resource is then
//! pointed at the new revision. Anything else referring to the task definition (a scheduled
//! task rule, a service using `Fn::GetAtt`, ...) would keep the old revision, so such a
//! change is not hotswappable.
//!
//! Only the task and container fields [`crate::app::hotswap::aws`] can send with
//! `RegisterTaskDefinition` are accepted; any other field would silently be dropped from
//! the new revision, so it makes the change non-hotswappable.

use serde_json::Value;

use super::physical_id;
use crate::app::cfn_intrinsic_functions::Expression;
use crate::app::hotswap::changes::{
    Classification, EcsServiceTarget, ResourceChange, ResourceOperation,
};
use crate::app::hotswap::classifier::ClassificationContext;
use crate::app::hotswap::error::EvaluationError;

const SERVICE_TYPE: &str = "AWS::ECS::Service";

pub const TASK_PROPERTIES: &[&str] = &[
    "Family",
    "Tags",
    "Cpu",
    "Memory",
    "TaskRoleArn",
    "ExecutionRoleArn",
    "NetworkMode",
    "RequiresCompatibilities",
    "ContainerDefinitions",
];

pub const CONTAINER_PROPERTIES: &[&str] = &[
    "Name",
    "Image",
    "WorkingDirectory",
    "Cpu",
    "Memory",
    "MemoryReservation",
    "Essential",
    "Command",
    "EntryPoint",
    "Environment",
    "PortMappings",
    "LogConfiguration",
];

pub const PORT_MAPPING_PROPERTIES: &[&str] = &["ContainerPort", "HostPort", "Protocol"];

pub const LOG_CONFIGURATION_PROPERTIES: &[&str] = &["LogDriver", "Options"];

pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    if change.changed_properties().contains("Family") {
        return Ok(ctx.non_hotswappable(
            change,
            "changing the Family of a task definition replaces it",
        ));
    }

    let mut services = Vec::new();
    for (logical_id, resource) in ctx.target_template.resources_referencing(change.logical_id) {
        let uses_ref = resource.properties.get("TaskDefinition")
            == Some(&Expression::Ref(change.logical_id.to_string()));
        if resource.resource_type != SERVICE_TYPE || !uses_ref {
            return Ok(ctx.non_hotswappable(
                change,
                format!(
                    "task definition is referenced by {} ({}), which cannot be updated in place",
                    logical_id, resource.resource_type
                ),
            ));
        }
        let service = ctx
            .source
            .find_resource_physical_id(logical_id)
            .ok_or_else(|| EvaluationError::UnresolvedReference(logical_id.to_string()))?;
        let cluster = match resource.properties.get("Cluster") {
            Some(cluster) => ctx.evaluator().evaluate_to_string(cluster)?,
            None => "default".to_string(),
        };
        services.push(EcsServiceTarget {
            logical_id: logical_id.to_string(),
            cluster,
            service,
        });
    }

    let evaluator = ctx.evaluator();
    let Some(new) = change.new else {
        return Ok(Classification::NoOp);
    };
    let task_definition = evaluator.evaluate_properties(&new.properties)?;
    let previous = change
        .old
        .and_then(|old| evaluator.evaluate_properties(&old.properties).ok());
    if previous.as_ref() == Some(&task_definition) {
        return Ok(Classification::NoOp);
    }
    if let Some(path) = unsupported_property(&task_definition) {
        return Ok(ctx.non_hotswappable(
            change,
            format!("task definition property {} is not supported for hotswapping", path),
        ));
    }

    let family = match task_definition.get("Family").and_then(|f| f.as_str()) {
        Some(family) => family.to_string(),
        None => family_from_arn(&physical_id(change, ctx)?).ok_or_else(|| {
            EvaluationError::Malformed(format!(
                "cannot determine the family of task definition {}",
                change.logical_id
            ))
        })?,
    };

    Ok(ctx.hotswappable(
        change,
        vec![ResourceOperation::RegisterTaskDefinitionAndUpdateServices {
            family,
            task_definition,
            services,
        }],
    ))
}

/// Path of the first field of an evaluated task definition that cannot be registered,
/// e.g. `ContainerDefinitions[0].Secrets`
pub fn unsupported_property(task_definition: &Value) -> Option<String> {
    let unknown = |value: &Value, allowed: &[&str]| -> Option<String> {
        value
            .as_object()?
            .keys()
            .find(|key| !allowed.contains(&key.as_str()))
            .cloned()
    };

    if let Some(name) = unknown(task_definition, TASK_PROPERTIES) {
        return Some(name);
    }
    let containers = task_definition.get("ContainerDefinitions").and_then(Value::as_array);
    for (index, container) in containers.into_iter().flatten().enumerate() {
        let path = format!("ContainerDefinitions[{}]", index);
        if let Some(name) = unknown(container, CONTAINER_PROPERTIES) {
            return Some(format!("{}.{}", path, name));
        }
        let mappings = container.get("PortMappings").and_then(Value::as_array);
        for (mapping_index, mapping) in mappings.into_iter().flatten().enumerate() {
            if let Some(name) = unknown(mapping, PORT_MAPPING_PROPERTIES) {
                return Some(format!("{}.PortMappings[{}].{}", path, mapping_index, name));
            }
        }
        if let Some(name) = container
            .get("LogConfiguration")
            .and_then(|log| unknown(log, LOG_CONFIGURATION_PROPERTIES))
        {
            return Some(format!("{}.LogConfiguration.{}", path, name));
        }
    }
    None
}

/// `arn:aws:ecs:<region>:<account>:task-definition/<family>:<revision>` -> `<family>`
fn family_from_arn(arn: &str) -> Option<String> {
    let (_, name) = arn.rsplit_once("task-definition/")?;
    let family = name.rsplit_once(':').map_or(name, |(family, _)| family);
    (!family.is_empty()).then(|| family.to_string())
}
