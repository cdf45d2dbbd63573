//! Per resource type classification rules.
//!
//! Each rule receives a `PropertiesModified` change of its type whose resource attributes
//! are unchanged, and returns the operations needed to apply it, or the reason it cannot
//! be hotswapped.

pub mod bucket_deployment;
pub mod ecs_task_definition;
pub mod lambda_function;
pub mod nested_stack;
pub mod state_machine;

use serde_json::Value;

use super::changes::ResourceChange;
use super::classifier::ClassificationContext;
use super::error::EvaluationError;

/// A property evaluated on both sides of a change
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedProperty {
    /// Deployed value, `None` when absent or no longer evaluable
    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl EvaluatedProperty {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

/// Evaluate `name` on both sides. Only the target side must evaluate; the deployed side
/// may refer to things that no longer exist, which simply counts as a difference.
pub fn evaluate_property(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
    name: &str,
) -> Result<EvaluatedProperty, EvaluationError> {
    let evaluator = ctx.evaluator();
    let new = change
        .new_property(name)
        .map(|expr| evaluator.evaluate(expr))
        .transpose()?;
    let old = change
        .old_property(name)
        .and_then(|expr| evaluator.evaluate(expr).ok());
    Ok(EvaluatedProperty { old, new })
}

/// Changed properties outside `allowed`
pub fn blocked_properties<'a>(change: &ResourceChange<'a>, allowed: &[&str]) -> Vec<&'a str> {
    change
        .changed_properties()
        .into_iter()
        .filter(|name| !allowed.contains(name))
        .collect()
}

/// Physical ID of the changed resource
pub fn physical_id(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<String, EvaluationError> {
    ctx.source
        .find_resource_physical_id(change.logical_id)
        .ok_or_else(|| EvaluationError::UnresolvedReference(change.logical_id.to_string()))
}

pub fn blocked_reason(change: &ResourceChange<'_>, blocked: &[&str]) -> String {
    let noun = if blocked.len() == 1 { "property" } else { "properties" };
    format!(
        "{} {} of {} cannot be hotswapped",
        noun,
        blocked.join(", "),
        change.resource_type
    )
}
