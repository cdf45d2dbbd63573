//! Rendered CloudFormation template representation.
//!
//! This module provides the data structures for the two templates a hotswap attempt
//! compares: the one currently deployed on a stack and the newly rendered one. Templates
//! are parsed from JSON or YAML and are immutable once constructed.
//!
//! # Core Components
//!
//! - [`RenderedTemplate`] - The template sections the hotswap engine reads
//! - [`Resource`] - Individual resources, with properties parsed into [`Expression`] trees
//! - [`Parameter`] - Declared input parameters and their defaults
//! - [`DependsOn`] - Resource dependency declarations
//!
//! Resources, parameters and mappings are kept in [`BTreeMap`]s so that iteration order,
//! and therefore the order of every diff and operation list derived from a template, is
//! deterministic.
//!
//! # Examples
//!
//! ```rust
//! use cfn_hotswap::app::cfn_template::RenderedTemplate;
//!
//! let template = RenderedTemplate::from_json(r#"{
//!     "Resources": {
//!         "Func": {
//!             "Type": "AWS::Lambda::Function",
//!             "Properties": { "Code": { "S3Bucket": "assets", "S3Key": "v1.zip" } }
//!         }
//!     }
//! }"#).unwrap();
//! assert!(template.resources.contains_key("Func"));
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::app::cfn_intrinsic_functions::{Expression, IntrinsicFunctionType};

/// Resource type of a CloudFormation nested stack
pub const NESTED_STACK_TYPE: &str = "AWS::CloudFormation::Stack";

/// Metadata key under which synthesized nested stacks record their template asset path
pub const ASSET_PATH_METADATA_KEY: &str = "aws:asset:path";

/// Represents resource dependencies in CloudFormation templates.
///
/// CloudFormation allows dependencies to be specified as either a single resource name
/// or an array of resource names. This enum handles both formats during
/// serialization and deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependsOn {
    /// A single resource dependency
    Single(String),
    /// Multiple resource dependencies
    Multiple(Vec<String>),
}

impl Default for DependsOn {
    fn default() -> Self {
        DependsOn::Multiple(Vec::new())
    }
}

impl DependsOn {
    /// Dependencies as a set; order and single/array form are not significant
    pub fn to_set(&self) -> BTreeSet<String> {
        match self {
            DependsOn::Single(s) => std::iter::once(s.clone()).collect(),
            DependsOn::Multiple(v) => v.iter().cloned().collect(),
        }
    }
}

impl Serialize for DependsOn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            DependsOn::Single(s) => s.serialize(serializer),
            DependsOn::Multiple(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DependsOn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) => Ok(DependsOn::Single(s)),
            Value::Array(arr) => {
                let strings: Result<Vec<String>, _> = arr
                    .into_iter()
                    .map(|v| {
                        v.as_str()
                            .map(|s| s.to_string())
                            .ok_or_else(|| serde::de::Error::custom("Expected string in array"))
                    })
                    .collect();
                Ok(DependsOn::Multiple(strings?))
            }
            _ => Err(serde::de::Error::custom("Expected string or array")),
        }
    }
}

/// A rendered CloudFormation template.
///
/// Only the sections the hotswap engine needs are modelled. `Conditions`, `Rules` and
/// `Metadata` at template level are kept as raw JSON so that a template can be
/// round-tripped, but they take no part in the diff.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RenderedTemplate {
    #[serde(
        rename = "AWSTemplateFormatVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub aws_template_format_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mappings: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub conditions: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resources: BTreeMap<String, Resource>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// A template parameter declaration.
///
/// Only the type and default matter for evaluation; constraints are validated by
/// CloudFormation itself during a full deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub parameter_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<Value>,
}

impl Parameter {
    /// The default value rendered the way CloudFormation passes parameter values around:
    /// as a string, list defaults joined with commas.
    pub fn default_as_string(&self) -> Option<String> {
        self.default.as_ref().and_then(scalar_to_string)
    }
}

/// A resource definition within a rendered template.
///
/// Properties are parsed into [`Expression`] trees. The remaining resource attributes are
/// kept so that a change to, say, `DeletionPolicy` is visible to the diff engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Expression>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<DependsOn>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_policy: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_policy: Option<Value>,
}

impl Resource {
    /// Create a resource of the given type with the given properties
    pub fn new(resource_type: impl Into<String>, properties: BTreeMap<String, Expression>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties,
            ..Default::default()
        }
    }

    pub fn is_nested_stack(&self) -> bool {
        self.resource_type == NESTED_STACK_TYPE
    }

    /// Names of resource-level attributes (other than `Properties` and `Metadata`) whose
    /// values differ from `other`. `Metadata` only carries tooling information such as
    /// asset paths, so it never affects the deployed resource.
    pub fn changed_attributes(&self, other: &Resource) -> Vec<&'static str> {
        let mut changed = Vec::new();
        let deps = |r: &Resource| r.depends_on.as_ref().map(DependsOn::to_set);
        if deps(self) != deps(other) {
            changed.push("DependsOn");
        }
        if self.condition != other.condition {
            changed.push("Condition");
        }
        if self.deletion_policy != other.deletion_policy {
            changed.push("DeletionPolicy");
        }
        if self.update_replace_policy != other.update_replace_policy {
            changed.push("UpdateReplacePolicy");
        }
        if self.creation_policy != other.creation_policy {
            changed.push("CreationPolicy");
        }
        if self.update_policy != other.update_policy {
            changed.push("UpdatePolicy");
        }
        changed
    }

    /// The template asset path recorded in the resource metadata, if any
    pub fn asset_path(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(ASSET_PATH_METADATA_KEY))
            .and_then(Value::as_str)
    }
}

/// A template output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Expression,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl RenderedTemplate {
    /// Load a template from a JSON or YAML file.
    ///
    /// The format is chosen from the file extension; files with any other extension are
    /// parsed as JSON when they start with `{` and as YAML otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid template.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read template {}: {}", path.display(), e))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => {
                if content.trim_start().starts_with('{') {
                    Self::from_json(&content)
                } else {
                    Self::from_yaml(&content)
                }
            }
        }
    }

    /// Parse a template from a JSON string.
    pub fn from_json(json_content: &str) -> Result<Self> {
        serde_json::from_str::<RenderedTemplate>(json_content)
            .map_err(|e| anyhow!("Failed to parse JSON: {}", e))
    }

    /// Parse a template from a YAML string.
    ///
    /// Short-form intrinsic tags (`!Ref`, `!Sub`, `!GetAtt`, ...) are rewritten to their
    /// long form, so a YAML template yields the same [`Expression`] trees as its JSON form.
    pub fn from_yaml(yaml_content: &str) -> Result<Self> {
        let document = serde_yaml::from_str::<serde_yaml::Value>(yaml_content)
            .map_err(|e| anyhow!("Failed to parse YAML: {}", e))?;
        Self::from_value(yaml_to_json(document)?)
    }

    /// Build a template from an already parsed JSON document (e.g. a `GetTemplate` body).
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value::<RenderedTemplate>(value)
            .map_err(|e| anyhow!("Failed to interpret template: {}", e))
    }

    /// Logical IDs of every resource whose properties refer to `logical_id`
    pub fn resources_referencing(&self, logical_id: &str) -> Vec<(&str, &Resource)> {
        self.resources
            .iter()
            .filter(|(id, _)| id.as_str() != logical_id)
            .filter(|(_, resource)| {
                resource
                    .properties
                    .values()
                    .any(|value| value.references(logical_id))
            })
            .map(|(id, resource)| (id.as_str(), resource))
            .collect()
    }
}

/// Render a scalar (or list of scalars) as CloudFormation passes it as a parameter value.
/// Convert a YAML document to JSON, expanding short-form intrinsic tags
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| anyhow!("YAML number {} has no JSON representation", n))?
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut object = serde_json::Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => bail!("Unsupported YAML mapping key {:?}", other),
                };
                object.insert(key, yaml_to_json(value)?);
            }
            Value::Object(object)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let key = long_form_key(tag.trim_start_matches('!'))
                .ok_or_else(|| anyhow!("Unsupported YAML tag {} in template", tag))?;
            let mut object = serde_json::Map::new();
            object.insert(key, yaml_to_json(tagged.value)?);
            Value::Object(object)
        }
    })
}

/// `Ref` -> `Ref`, `Condition` -> `Condition`, `Sub` -> `Fn::Sub`, ...
fn long_form_key(short_form: &str) -> Option<String> {
    if short_form == "Condition" {
        return Some(short_form.to_string());
    }
    IntrinsicFunctionType::from_json_name(short_form)
        .or_else(|| IntrinsicFunctionType::from_json_name(&format!("Fn::{}", short_form)))
        .map(|function| function.json_name().to_string())
}

pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(",")),
        Value::Null | Value::Object(_) => None,
    }
}
