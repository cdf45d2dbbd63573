//! Resource Change Classifier
//!
//! Decides, per resource change, whether it is a no-op, hotswappable, or blocks the
//! hotswap. Dispatch goes through [`ResourceKind`], a closed registry of the types the
//! engine knows; every other type falls into [`ResourceKind::Unsupported`], which always
//! blocks.
//!
//! Rules report evaluation failures as [`EvaluationError`]s. They are turned into
//! non-hotswappable changes carrying the error message, except for errors that make the
//! template unevaluable as a whole, which abort the attempt.

use super::changes::{ChangeKind, Classification, HotswappableChange, NonHotswappableChange, ResourceChange, ResourceOperation};
use super::error::{EvaluationError, HotswapError};
use super::evaluator::ExpressionEvaluator;
use super::rules;
use super::value_source::ValueSource;
use crate::app::cfn_template::{RenderedTemplate, NESTED_STACK_TYPE};

/// Resource types whose additions, removals and modifications never affect a running
/// application and are skipped
pub const SIDE_EFFECT_ONLY_TYPES: &[&str] = &["AWS::CDK::Metadata"];

/// Everything a rule may read while classifying one change
pub struct ClassificationContext<'a> {
    pub stack_name: &'a str,
    pub source: &'a dyn ValueSource,
    pub current_template: &'a RenderedTemplate,
    pub target_template: &'a RenderedTemplate,
}

impl<'a> ClassificationContext<'a> {
    pub fn evaluator(&self) -> ExpressionEvaluator<'a> {
        ExpressionEvaluator::new(self.source)
    }

    pub fn hotswappable(
        &self,
        change: &ResourceChange<'_>,
        operations: Vec<ResourceOperation>,
    ) -> Classification {
        if operations.is_empty() {
            return Classification::NoOp;
        }
        Classification::Hotswappable(HotswappableChange {
            stack_name: self.stack_name.to_string(),
            logical_id: change.logical_id.to_string(),
            resource_type: change.resource_type.to_string(),
            operations,
        })
    }

    pub fn non_hotswappable(
        &self,
        change: &ResourceChange<'_>,
        reason: impl Into<String>,
    ) -> Classification {
        Classification::NonHotswappable(NonHotswappableChange {
            stack_name: self.stack_name.to_string(),
            logical_id: change.logical_id.to_string(),
            resource_type: change.resource_type.to_string(),
            reason: reason.into(),
        })
    }
}

/// Resource types with a classification rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    LambdaFunction,
    StateMachine,
    EcsTaskDefinition,
    BucketDeployment,
    NestedStack,
    SideEffectOnly,
    Unsupported,
}

impl ResourceKind {
    pub fn of(resource_type: &str) -> Self {
        match resource_type {
            "AWS::Lambda::Function" => ResourceKind::LambdaFunction,
            "AWS::StepFunctions::StateMachine" => ResourceKind::StateMachine,
            "AWS::ECS::TaskDefinition" => ResourceKind::EcsTaskDefinition,
            "Custom::CDKBucketDeployment" => ResourceKind::BucketDeployment,
            NESTED_STACK_TYPE => ResourceKind::NestedStack,
            t if SIDE_EFFECT_ONLY_TYPES.contains(&t) => ResourceKind::SideEffectOnly,
            _ => ResourceKind::Unsupported,
        }
    }
}

/// Classify one resource change.
///
/// Returns `Err` only for failures that make the whole attempt unsafe to continue.
pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, HotswapError> {
    let classification = match classify_change(change, ctx) {
        Ok(classification) => classification,
        Err(e) if e.is_fatal() => {
            log_error!(
                "Resource {} in stack {} cannot be evaluated: {}",
                change.logical_id,
                ctx.stack_name,
                e
            );
            return Err(HotswapError::UnresolvableParameter {
                stack_name: ctx.stack_name.to_string(),
                logical_id: change.logical_id.to_string(),
                source: e,
            });
        }
        Err(e) => ctx.non_hotswappable(change, e.to_string()),
    };

    match &classification {
        Classification::NoOp => {
            log_debug!("{} ({}): no-op", change.logical_id, change.resource_type);
        }
        Classification::Hotswappable(c) => {
            log_debug!(
                "{} ({}): hotswappable with {} operation(s)",
                change.logical_id,
                change.resource_type,
                c.operations.len()
            );
        }
        Classification::NonHotswappable(c) => {
            log_debug!(
                "{} ({}): not hotswappable: {}",
                change.logical_id,
                change.resource_type,
                c.reason
            );
        }
    }

    Ok(classification)
}

fn classify_change(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    let kind = ResourceKind::of(change.resource_type);

    match change.kind {
        ChangeKind::TypeChanged => {
            let old_type = change.old_type().unwrap_or_default();
            let new_type = change.new_type().unwrap_or_default();
            let reason = if old_type == NESTED_STACK_TYPE || new_type == NESTED_STACK_TYPE {
                format!(
                    "resource changes between a nested stack and a plain resource ({} -> {})",
                    old_type, new_type
                )
            } else {
                format!("resource type changed from {} to {}", old_type, new_type)
            };
            return Ok(ctx.non_hotswappable(change, reason));
        }
        ChangeKind::Added | ChangeKind::Removed if kind == ResourceKind::SideEffectOnly => {
            return Ok(Classification::NoOp);
        }
        ChangeKind::Added if kind == ResourceKind::NestedStack => {
            return Ok(ctx.non_hotswappable(change, "creating a nested stack is not supported"));
        }
        ChangeKind::Added => {
            return Ok(ctx.non_hotswappable(
                change,
                "resource was added; creating resources requires a full deployment",
            ));
        }
        ChangeKind::Removed => {
            return Ok(ctx.non_hotswappable(
                change,
                "resource was removed; deleting resources requires a full deployment",
            ));
        }
        ChangeKind::PropertiesModified => {}
    }

    if kind == ResourceKind::SideEffectOnly {
        return Ok(Classification::NoOp);
    }

    let attributes = change.changed_attributes();
    if !attributes.is_empty() {
        return Ok(ctx.non_hotswappable(
            change,
            format!("resource attribute(s) {} changed", attributes.join(", ")),
        ));
    }

    match kind {
        ResourceKind::LambdaFunction => rules::lambda_function::classify(change, ctx),
        ResourceKind::StateMachine => rules::state_machine::classify(change, ctx),
        ResourceKind::EcsTaskDefinition => rules::ecs_task_definition::classify(change, ctx),
        ResourceKind::BucketDeployment => rules::bucket_deployment::classify(change, ctx),
        ResourceKind::NestedStack => rules::nested_stack::classify(change, ctx),
        ResourceKind::SideEffectOnly => Ok(Classification::NoOp),
        ResourceKind::Unsupported => Ok(ctx.non_hotswappable(
            change,
            format!(
                "resource type {} is not supported for hotswapping",
                change.resource_type
            ),
        )),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::app::hotswap::value_source::{DeploymentEnvironment, LiveResource, StackValueSource};
    use std::collections::BTreeMap;

    pub fn source(live: Vec<LiveResource>) -> StackValueSource {
        StackValueSource::new(
            "test-stack",
            DeploymentEnvironment::new("123456789012", "us-east-1"),
            live,
        )
    }

    pub fn with_parameters(source: StackValueSource, template: &RenderedTemplate) -> StackValueSource {
        source.with_template_parameters(template, &BTreeMap::new(), &BTreeMap::new())
    }

    pub fn template(value: serde_json::Value) -> RenderedTemplate {
        RenderedTemplate::from_value(value).unwrap()
    }

    /// Classify the single change between two templates
    pub fn classify_single(
        current: &RenderedTemplate,
        target: &RenderedTemplate,
        source: &StackValueSource,
    ) -> Result<Classification, HotswapError> {
        let changes = crate::app::hotswap::diff::diff(current, target);
        assert_eq!(changes.len(), 1, "expected exactly one change");
        let ctx = ClassificationContext {
            stack_name: "test-stack",
            source,
            current_template: current,
            target_template: target,
        };
        classify(&changes[0], &ctx)
    }
}
