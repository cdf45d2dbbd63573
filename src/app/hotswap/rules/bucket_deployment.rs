//! `Custom::CDKBucketDeployment`: re-run the provider with an `Update` event
//!
//! The provider function copies assets into the destination bucket. Invoking it directly
//! with the event CloudFormation would send is enough to apply a property change; the
//! response URL is a placeholder the provider recognises and skips.

use serde_json::{json, Map, Value};

use super::{blocked_reason, physical_id};
use crate::app::hotswap::changes::{Classification, ResourceChange, ResourceOperation};
use crate::app::hotswap::classifier::ClassificationContext;
use crate::app::hotswap::error::EvaluationError;
use crate::app::hotswap::value_source::ParameterLookup;

/// Response URL that tells the provider not to report back to CloudFormation
pub const SKIP_RESPONSE_URL: &str = "pre-signed-s3-url-for-response";

pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    if change.changed_properties().contains("ServiceToken") {
        return Ok(ctx.non_hotswappable(change, blocked_reason(change, &["ServiceToken"])));
    }

    let evaluator = ctx.evaluator();
    let Some(new) = change.new else {
        return Ok(Classification::NoOp);
    };
    let properties = evaluator.evaluate_properties(&new.properties)?;
    let old_properties = change
        .old
        .and_then(|old| evaluator.evaluate_properties(&old.properties).ok())
        .unwrap_or_else(|| Value::Object(Map::new()));
    if properties == old_properties {
        return Ok(Classification::NoOp);
    }

    let Some(function_name) = properties
        .get("ServiceToken")
        .and_then(Value::as_str)
        .map(str::to_string)
    else {
        return Ok(ctx.non_hotswappable(change, "custom resource has no ServiceToken"));
    };

    let stack_id = match ctx.source.find_parameter_value("AWS::StackId") {
        ParameterLookup::Found(id) => id,
        _ => ctx.stack_name.to_string(),
    };

    let event = json!({
        "RequestType": "Update",
        "ResponseURL": SKIP_RESPONSE_URL,
        "PhysicalResourceId": physical_id(change, ctx)?,
        "StackId": stack_id,
        "LogicalResourceId": change.logical_id,
        "ResourceType": change.resource_type,
        "ResourceProperties": properties,
        "OldResourceProperties": old_properties,
    });

    Ok(ctx.hotswappable(
        change,
        vec![ResourceOperation::InvokeCustomResource {
            function_name,
            event,
        }],
    ))
}
