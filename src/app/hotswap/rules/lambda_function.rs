//! `AWS::Lambda::Function`: code, environment and description updates

use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use zip::write::FileOptions;

use super::{blocked_properties, blocked_reason, evaluate_property, physical_id};
use crate::app::cfn_template::scalar_to_string;
use crate::app::hotswap::changes::{
    Classification, LambdaCode, LambdaConfigurationUpdate, ResourceChange, ResourceOperation,
};
use crate::app::hotswap::classifier::ClassificationContext;
use crate::app::hotswap::error::EvaluationError;

const HOTSWAPPABLE_PROPERTIES: &[&str] = &["Code", "Description", "Environment"];

pub fn classify(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<Classification, EvaluationError> {
    let blocked = blocked_properties(change, HOTSWAPPABLE_PROPERTIES);
    if !blocked.is_empty() {
        return Ok(ctx.non_hotswappable(change, blocked_reason(change, &blocked)));
    }

    let changed = change.changed_properties();
    let function_name = function_name(change, ctx)?;
    let mut operations = Vec::new();

    if changed.contains("Code") {
        let code = evaluate_property(change, ctx, "Code")?;
        if code.changed() {
            let code = lambda_code(code.new.as_ref(), change, ctx)?;
            operations.push(ResourceOperation::UpdateLambdaCode {
                function_name: function_name.clone(),
                code,
            });
        }
    }

    let mut update = LambdaConfigurationUpdate::default();
    if changed.contains("Description") {
        let description = evaluate_property(change, ctx, "Description")?;
        if description.changed() {
            update.description = Some(
                description
                    .new
                    .as_ref()
                    .and_then(scalar_to_string)
                    .unwrap_or_default(),
            );
        }
    }
    if changed.contains("Environment") {
        let environment = evaluate_property(change, ctx, "Environment")?;
        if environment.changed() {
            update.environment = Some(environment_variables(environment.new.as_ref())?);
        }
    }
    if update != LambdaConfigurationUpdate::default() {
        operations.push(ResourceOperation::UpdateLambdaConfiguration {
            function_name,
            update,
        });
    }

    Ok(ctx.hotswappable(change, operations))
}

fn function_name(
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<String, EvaluationError> {
    match change.new_property("FunctionName") {
        Some(name) => ctx.evaluator().evaluate_to_string(name),
        None => physical_id(change, ctx),
    }
}

fn lambda_code(
    code: Option<&Value>,
    change: &ResourceChange<'_>,
    ctx: &ClassificationContext<'_>,
) -> Result<LambdaCode, EvaluationError> {
    let field = |name: &str| code.and_then(|c| c.get(name)).and_then(scalar_to_string);

    if let (Some(bucket), Some(key)) = (field("S3Bucket"), field("S3Key")) {
        return Ok(LambdaCode::S3 {
            bucket,
            key,
            object_version: field("S3ObjectVersion"),
        });
    }
    if let Some(image_uri) = field("ImageUri") {
        return Ok(LambdaCode::Image { image_uri });
    }
    if let Some(source) = field("ZipFile") {
        let runtime = change
            .new_property("Runtime")
            .map(|r| ctx.evaluator().evaluate_to_string(r))
            .transpose()?
            .unwrap_or_default();
        let file_name = inline_file_name(&runtime).ok_or_else(|| {
            EvaluationError::Malformed(format!(
                "inline code cannot be hotswapped for runtime '{}'",
                runtime
            ))
        })?;
        let zip = zip_inline_code(file_name, &source).map_err(|e| {
            EvaluationError::Malformed(format!("could not package inline code: {}", e))
        })?;
        return Ok(LambdaCode::ZipFile(zip));
    }

    Err(EvaluationError::Malformed(
        "Code must set S3Bucket and S3Key, ImageUri or ZipFile".to_string(),
    ))
}

fn inline_file_name(runtime: &str) -> Option<&'static str> {
    if runtime.starts_with("nodejs") {
        Some("index.js")
    } else if runtime.starts_with("python") {
        Some("index.py")
    } else {
        None
    }
}

/// Package inline source as a single-file deployment zip
pub fn zip_inline_code(file_name: &str, source: &str) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o755);
    writer.start_file(file_name, options)?;
    writer.write_all(source.as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

fn environment_variables(
    environment: Option<&Value>,
) -> Result<BTreeMap<String, String>, EvaluationError> {
    let Some(variables) = environment.and_then(|e| e.get("Variables")) else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(variables) = variables else {
        return Err(EvaluationError::Malformed(
            "Environment.Variables must be a map".to_string(),
        ));
    };
    variables
        .iter()
        .map(|(name, value)| {
            scalar_to_string(value)
                .map(|value| (name.clone(), value))
                .ok_or_else(|| {
                    EvaluationError::Malformed(format!(
                        "environment variable {} is not a string",
                        name
                    ))
                })
        })
        .collect()
}
