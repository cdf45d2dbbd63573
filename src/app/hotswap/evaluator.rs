//! Expression Evaluator
//!
//! Resolves [`Expression`] trees into concrete JSON values through a [`ValueSource`].
//! Evaluation is a synchronous structural fold: children are evaluated before their
//! parents, and the only side effects are lookups through the source.
//!
//! `Ref` to a name declared as a parameter (or an `AWS::` pseudo parameter) yields the
//! parameter value; any other name is looked up as a deployed resource. `Ref` to
//! `AWS::NoValue` removes the enclosing list element or map entry.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::error::EvaluationError;
use super::value_source::{AttributeLookup, ParameterLookup, ValueSource};
use crate::app::cfn_intrinsic_functions::{parse_sub_template, Expression, SubTemplatePart};
use crate::app::cfn_template::scalar_to_string;

pub type EvalResult<T> = Result<T, EvaluationError>;

const NO_VALUE: &str = "AWS::NoValue";

/// Evaluates expressions of one stack level
pub struct ExpressionEvaluator<'a> {
    source: &'a dyn ValueSource,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(source: &'a dyn ValueSource) -> Self {
        Self { source }
    }

    /// Evaluate an expression into a JSON value
    pub fn evaluate(&self, expr: &Expression) -> EvalResult<Value> {
        match expr {
            Expression::Null => Ok(Value::Null),
            Expression::Bool(b) => Ok(Value::Bool(*b)),
            Expression::Number(n) => Ok(Value::Number(n.clone())),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items.iter().filter(|item| !is_no_value(item)) {
                    values.push(self.evaluate(item)?);
                }
                Ok(Value::Array(values))
            }
            Expression::Map(entries) => self.evaluate_properties(entries),
            Expression::Ref(name) => self.resolve_ref(name).map(Value::String),
            Expression::GetAtt {
                logical_id,
                attribute,
            } => self.resolve_get_att(logical_id, attribute).map(Value::String),
            Expression::Join { delimiter, parts } => self.evaluate_join(delimiter, parts),
            Expression::Select { index, list } => self.evaluate_select(index, list),
            Expression::Split { delimiter, source } => {
                let source = self.evaluate_to_string(source)?;
                Ok(Value::Array(
                    source
                        .split(delimiter.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
            Expression::Sub {
                template,
                variables,
            } => self.evaluate_sub(template, variables).map(Value::String),
            Expression::FindInMap {
                map_name,
                top_level_key,
                second_level_key,
            } => {
                let map_name = self.evaluate_to_string(map_name)?;
                let top = self.evaluate_to_string(top_level_key)?;
                let second = self.evaluate_to_string(second_level_key)?;
                self.source
                    .find_mapping_value(&map_name, &top, &second)
                    .ok_or_else(|| {
                        EvaluationError::MappingNotFound(format!("[{map_name}, {top}, {second}]"))
                    })
            }
            Expression::Base64(inner) => {
                let plain = self.evaluate_to_string(inner)?;
                Ok(Value::String(STANDARD.encode(plain.as_bytes())))
            }
            Expression::ImportValue(inner) => {
                let export_name = self.evaluate_to_string(inner)?;
                self.source
                    .find_export_value(&export_name)
                    .map(Value::String)
                    .ok_or(EvaluationError::ExportNotFound(export_name))
            }
            Expression::Unsupported { function, .. } => Err(
                EvaluationError::UnsupportedIntrinsic(function.json_name().to_string()),
            ),
            Expression::Malformed { function, raw } => Err(EvaluationError::Malformed(format!(
                "Invalid arguments to {function}: {raw}"
            ))),
        }
    }

    /// Evaluate an expression that must produce a scalar, rendered as a string.
    /// Lists of scalars are joined with commas, the way parameter values are passed.
    pub fn evaluate_to_string(&self, expr: &Expression) -> EvalResult<String> {
        let value = self.evaluate(expr)?;
        scalar_to_string(&value).ok_or_else(|| {
            EvaluationError::Malformed(format!("Expected a string value, got {value}"))
        })
    }

    /// Evaluate a property bag, dropping entries that are `Ref: AWS::NoValue`
    pub fn evaluate_properties(&self, properties: &BTreeMap<String, Expression>) -> EvalResult<Value> {
        let mut object = Map::new();
        for (key, value) in properties.iter().filter(|(_, v)| !is_no_value(v)) {
            object.insert(key.clone(), self.evaluate(value)?);
        }
        Ok(Value::Object(object))
    }

    fn resolve_ref(&self, name: &str) -> EvalResult<String> {
        match self.source.find_parameter_value(name) {
            ParameterLookup::Found(value) => {
                trace_trace!("Ref {} resolved from parameter", name);
                return Ok(value);
            }
            ParameterLookup::DeclaredWithoutValue => {
                return Err(EvaluationError::ParameterWithoutValue(name.to_string()));
            }
            ParameterLookup::NotDeclared => {}
        }

        match self.source.find_resource_physical_id(name) {
            Some(physical_id) => {
                trace_trace!("Ref {} resolved to physical ID {}", name, physical_id);
                Ok(physical_id)
            }
            None => Err(EvaluationError::UnresolvedReference(name.to_string())),
        }
    }

    fn resolve_get_att(&self, logical_id: &str, attribute: &str) -> EvalResult<String> {
        match self.source.find_resource_attribute(logical_id, attribute) {
            AttributeLookup::Found(value) => {
                trace_trace!("GetAtt {}.{} resolved to {}", logical_id, attribute, value);
                Ok(value)
            }
            AttributeLookup::NotFound => {
                Err(EvaluationError::UnresolvedReference(logical_id.to_string()))
            }
            AttributeLookup::Unsupported { resource_type } => {
                Err(EvaluationError::UnsupportedAttribute {
                    resource_type,
                    attribute: attribute.to_string(),
                })
            }
        }
    }

    fn evaluate_join(&self, delimiter: &str, parts: &Expression) -> EvalResult<Value> {
        let Value::Array(items) = self.evaluate(parts)? else {
            return Err(EvaluationError::Malformed(
                "Fn::Join expects a list of values".to_string(),
            ));
        };
        let strings = items
            .iter()
            .map(|item| {
                scalar_to_string(item).ok_or_else(|| {
                    EvaluationError::Malformed(format!("Fn::Join cannot join value {item}"))
                })
            })
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(Value::String(strings.join(delimiter)))
    }

    fn evaluate_select(&self, index: &Expression, list: &Expression) -> EvalResult<Value> {
        let index_value = self.evaluate(index)?;
        let position = match &index_value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            EvaluationError::Malformed(format!("Fn::Select index {index_value} is not a number"))
        })?;

        let items = match self.evaluate(list)? {
            Value::Array(items) => items,
            // A comma delimited list parameter arrives as one string
            Value::String(s) => s.split(',').map(|p| Value::String(p.to_string())).collect(),
            other => {
                return Err(EvaluationError::Malformed(format!(
                    "Fn::Select expects a list, got {other}"
                )))
            }
        };

        usize::try_from(position)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or_else(|| {
                EvaluationError::Malformed(format!(
                    "Fn::Select index {position} out of range for list of {} elements",
                    items.len()
                ))
            })
    }

    fn evaluate_sub(
        &self,
        template: &str,
        variables: &BTreeMap<String, Expression>,
    ) -> EvalResult<String> {
        let mut out = String::with_capacity(template.len());
        for part in parse_sub_template(template) {
            match part {
                SubTemplatePart::Literal(text) => out.push_str(&text),
                SubTemplatePart::Placeholder(token) => {
                    let value = if let Some(variable) = variables.get(&token) {
                        self.evaluate_to_string(variable)?
                    } else if token.starts_with("AWS::") {
                        self.resolve_ref(&token)?
                    } else if let Some((logical_id, attribute)) = token.split_once('.') {
                        self.resolve_get_att(logical_id, attribute)?
                    } else {
                        self.resolve_ref(&token)?
                    };
                    trace_trace!("Fn::Sub token ${{{}}} -> {}", token, value);
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn is_no_value(expr: &Expression) -> bool {
    matches!(expr, Expression::Ref(name) if name == NO_VALUE)
}

/// Evaluate `expr` against `source`
pub fn evaluate(expr: &Expression, source: &dyn ValueSource) -> EvalResult<Value> {
    ExpressionEvaluator::new(source).evaluate(expr)
}
