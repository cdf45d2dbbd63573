//! `AWS::StepFunctions::StateMachine`: definition updates
//!
//! `DefinitionSubstitutions` are applied to the definition before it is compared or sent,
//! the way CloudFormation does on a full deployment. A substitution value that cannot be
//! evaluated makes the change non-hotswappable.

use serde_json::Value;

use super::{blocked_properties, blocked_reason, physical_id};
use crate::app::cfn_intrinsic_functions::Expression;
use crate::app::cfn_template::{scalar_to_string, Resource};
use crate::app::hotswap::changes::{Classification, ResourceChange, ResourceOperation};
use crate::app::hotswap::classifier::ClassificationContext;
use crate::app::hotswap::error::EvaluationError;
use crate::app::hotswap::evaluator::ExpressionEvaluator;

const HOTSWAPPABLE_PROPERTIES: &[&str] =
    &["Definition", "DefinitionString", "DefinitionSubstitutions"];

pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    let blocked = blocked_properties(change, HOTSWAPPABLE_PROPERTIES);
    if !blocked.is_empty() {
        return Ok(ctx.non_hotswappable(change, blocked_reason(change, &blocked)));
    }

    let evaluator = ctx.evaluator();
    let Some(new_definition) = change
        .new
        .map(|resource| definition(resource, &evaluator))
        .transpose()?
        .flatten()
    else {
        return Ok(ctx.non_hotswappable(change, "state machine definition was removed"));
    };
    let old_definition = change
        .old
        .and_then(|resource| definition(resource, &evaluator).ok())
        .flatten();

    if old_definition.as_deref() == Some(new_definition.as_str()) {
        return Ok(Classification::NoOp);
    }

    let operation = ResourceOperation::UpdateStateMachine {
        state_machine_arn: physical_id(change, ctx)?,
        definition: new_definition,
    };
    Ok(ctx.hotswappable(change, vec![operation]))
}

/// The definition as the JSON document string `UpdateStateMachine` expects, with
/// `DefinitionSubstitutions` applied
fn definition(
    resource: &Resource,
    evaluator: &ExpressionEvaluator<'_>,
) -> Result<Option<String>, EvaluationError> {
    let raw = if let Some(definition) = resource.properties.get("DefinitionString") {
        evaluator.evaluate_to_string(definition)?
    } else {
        match resource.properties.get("Definition") {
            Some(definition) => match evaluator.evaluate(definition)? {
                Value::String(s) => s,
                other => serde_json::to_string(&other)
                    .map_err(|e| EvaluationError::Malformed(e.to_string()))?,
            },
            None => return Ok(None),
        }
    };

    match resource.properties.get("DefinitionSubstitutions") {
        Some(substitutions) => substitute(raw, substitutions, evaluator).map(Some),
        None => Ok(Some(raw)),
    }
}

/// Replace every `${Key}` of the definition with the evaluated substitution value
fn substitute(
    mut definition: String,
    substitutions: &Expression,
    evaluator: &ExpressionEvaluator<'_>,
) -> Result<String, EvaluationError> {
    let Value::Object(values) = evaluator.evaluate(substitutions)? else {
        return Err(EvaluationError::Malformed(
            "DefinitionSubstitutions must be a map".to_string(),
        ));
    };
    for (key, value) in &values {
        let value = scalar_to_string(value).ok_or_else(|| {
            EvaluationError::Malformed(format!(
                "definition substitution {} is not a scalar: {}",
                key, value
            ))
        })?;
        definition = definition.replace(&format!("${{{}}}", key), &value);
    }
    Ok(definition)
}
