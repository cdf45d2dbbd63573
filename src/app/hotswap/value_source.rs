//! Value sources for expression evaluation.
//!
//! A [`ValueSource`] answers the lookups the evaluator needs: physical IDs of deployed
//! resources, attributes, parameter values, mapping entries and exports. The concrete
//! [`StackValueSource`] is scoped to one stack level and built from that stack's live
//! resource listing, its parameter bindings and its template's mappings. A nested stack's
//! source is derived from its parent's with [`StackValueSource::for_nested_stack`], which
//! keeps the environment-wide pieces (account, region, exports) and replaces everything
//! stack-specific.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::attributes::format_attribute;
use crate::app::cfn_template::{RenderedTemplate, NESTED_STACK_TYPE};

/// Result of an attribute lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeLookup {
    Found(String),
    /// The resource is not deployed (or has no physical ID yet)
    NotFound,
    /// The resource exists but the attribute cannot be derived for its type
    Unsupported { resource_type: String },
}

/// Result of a parameter lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterLookup {
    Found(String),
    /// Declared in the template but no value could be determined
    DeclaredWithoutValue,
    NotDeclared,
}

/// Capability the evaluator resolves references through
pub trait ValueSource: Send + Sync {
    fn find_resource_physical_id(&self, logical_id: &str) -> Option<String>;

    fn find_resource_attribute(&self, logical_id: &str, attribute: &str) -> AttributeLookup;

    /// Template parameters and `AWS::` pseudo parameters
    fn find_parameter_value(&self, name: &str) -> ParameterLookup;

    fn find_mapping_value(&self, mapping: &str, top_level_key: &str, second_level_key: &str)
        -> Option<Value>;

    fn find_export_value(&self, _export_name: &str) -> Option<String> {
        None
    }
}

/// Account-level context shared by every stack of one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentEnvironment {
    pub account_id: String,
    pub region: String,
    pub partition: String,
    pub url_suffix: String,
}

impl DeploymentEnvironment {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            partition: "aws".to_string(),
            url_suffix: "amazonaws.com".to_string(),
        }
    }
}

/// One entry of a stack's live resource listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveResource {
    pub logical_id: String,
    pub resource_type: String,
    pub physical_id: Option<String>,
}

impl LiveResource {
    pub fn new(
        logical_id: impl Into<String>,
        resource_type: impl Into<String>,
        physical_id: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            physical_id: Some(physical_id.into()),
        }
    }
}

/// Value source for one stack level
#[derive(Debug, Clone)]
pub struct StackValueSource {
    stack_name: String,
    stack_id: Option<String>,
    environment: Arc<DeploymentEnvironment>,
    live_resources: BTreeMap<String, LiveResource>,
    parameters: BTreeMap<String, Option<String>>,
    mappings: BTreeMap<String, Value>,
    nested_stack_outputs: BTreeMap<String, BTreeMap<String, String>>,
    exports: Arc<BTreeMap<String, String>>,
}

impl StackValueSource {
    pub fn new(
        stack_name: impl Into<String>,
        environment: DeploymentEnvironment,
        live_resources: impl IntoIterator<Item = LiveResource>,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id: None,
            environment: Arc::new(environment),
            live_resources: live_resources
                .into_iter()
                .map(|r| (r.logical_id.clone(), r))
                .collect(),
            parameters: BTreeMap::new(),
            mappings: BTreeMap::new(),
            nested_stack_outputs: BTreeMap::new(),
            exports: Arc::new(BTreeMap::new()),
        }
    }

    /// Source for a nested stack: same environment and exports, everything else replaced
    pub fn for_nested_stack(
        &self,
        stack_name: impl Into<String>,
        stack_id: Option<String>,
        live_resources: impl IntoIterator<Item = LiveResource>,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            stack_id,
            environment: Arc::clone(&self.environment),
            live_resources: live_resources
                .into_iter()
                .map(|r| (r.logical_id.clone(), r))
                .collect(),
            parameters: BTreeMap::new(),
            mappings: BTreeMap::new(),
            nested_stack_outputs: BTreeMap::new(),
            exports: Arc::clone(&self.exports),
        }
    }

    pub fn with_exports(mut self, exports: BTreeMap<String, String>) -> Self {
        self.exports = Arc::new(exports);
        self
    }

    /// Bind the parameters declared by `template`.
    ///
    /// Precedence: explicit binding (caller override, or the parent's `Parameters` for a
    /// nested stack), then the value currently deployed, then the declared `Default`.
    /// A deployment without overrides keeps the previous parameter values, so the deployed
    /// value wins over a `Default` that has since changed.
    pub fn with_template_parameters(
        mut self,
        template: &RenderedTemplate,
        bindings: &BTreeMap<String, String>,
        deployed_values: &BTreeMap<String, String>,
    ) -> Self {
        self.parameters = template
            .parameters
            .iter()
            .map(|(name, declaration)| {
                let value = bindings
                    .get(name)
                    .cloned()
                    .or_else(|| deployed_values.get(name).cloned())
                    .or_else(|| declaration.default_as_string());
                (name.clone(), value)
            })
            .collect();
        self.mappings = template.mappings.clone();
        self
    }

    pub fn with_nested_stack_outputs(
        mut self,
        logical_id: impl Into<String>,
        outputs: BTreeMap<String, String>,
    ) -> Self {
        self.nested_stack_outputs.insert(logical_id.into(), outputs);
        self
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn environment(&self) -> &DeploymentEnvironment {
        &self.environment
    }

    pub fn live_resource(&self, logical_id: &str) -> Option<&LiveResource> {
        self.live_resources.get(logical_id)
    }

    pub fn live_resources(&self) -> impl Iterator<Item = &LiveResource> {
        self.live_resources.values()
    }

    fn pseudo_parameter(&self, name: &str) -> Option<String> {
        let env = &self.environment;
        match name {
            "AWS::AccountId" => Some(env.account_id.clone()),
            "AWS::Region" => Some(env.region.clone()),
            "AWS::Partition" => Some(env.partition.clone()),
            "AWS::URLSuffix" => Some(env.url_suffix.clone()),
            "AWS::StackName" => Some(self.stack_name.clone()),
            "AWS::StackId" => self.stack_id.clone(),
            "AWS::NotificationARNs" => Some(String::new()),
            _ => None,
        }
    }
}

impl ValueSource for StackValueSource {
    fn find_resource_physical_id(&self, logical_id: &str) -> Option<String> {
        self.live_resources
            .get(logical_id)
            .and_then(|r| r.physical_id.clone())
    }

    fn find_resource_attribute(&self, logical_id: &str, attribute: &str) -> AttributeLookup {
        let Some(resource) = self.live_resources.get(logical_id) else {
            return AttributeLookup::NotFound;
        };
        let Some(physical_id) = resource.physical_id.as_deref() else {
            return AttributeLookup::NotFound;
        };

        if resource.resource_type == NESTED_STACK_TYPE {
            if let Some(output_name) = attribute.strip_prefix("Outputs.") {
                return match self
                    .nested_stack_outputs
                    .get(logical_id)
                    .and_then(|outputs| outputs.get(output_name))
                {
                    Some(value) => AttributeLookup::Found(value.clone()),
                    None => AttributeLookup::NotFound,
                };
            }
        }

        match format_attribute(
            &resource.resource_type,
            attribute,
            physical_id,
            &self.environment,
        ) {
            Some(value) => AttributeLookup::Found(value),
            None => AttributeLookup::Unsupported {
                resource_type: resource.resource_type.clone(),
            },
        }
    }

    fn find_parameter_value(&self, name: &str) -> ParameterLookup {
        if let Some(value) = self.pseudo_parameter(name) {
            return ParameterLookup::Found(value);
        }
        match self.parameters.get(name) {
            Some(Some(value)) => ParameterLookup::Found(value.clone()),
            Some(None) => ParameterLookup::DeclaredWithoutValue,
            None => ParameterLookup::NotDeclared,
        }
    }

    fn find_mapping_value(
        &self,
        mapping: &str,
        top_level_key: &str,
        second_level_key: &str,
    ) -> Option<Value> {
        self.mappings
            .get(mapping)
            .and_then(|m| m.get(top_level_key))
            .and_then(|m| m.get(second_level_key))
            .cloned()
    }

    fn find_export_value(&self, export_name: &str) -> Option<String> {
        self.exports.get(export_name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> StackValueSource {
        StackValueSource::new(
            "root",
            DeploymentEnvironment::new("123456789012", "eu-west-1"),
            vec![
                LiveResource::new("Func", "AWS::Lambda::Function", "root-Func-ABC"),
                LiveResource::new(
                    "Nested",
                    NESTED_STACK_TYPE,
                    "arn:aws:cloudformation:eu-west-1:123456789012:stack/root-Nested/1",
                ),
            ],
        )
    }

    #[test]
    fn test_parameter_precedence() {
        let template = RenderedTemplate::from_value(json!({
            "Parameters": {
                "Overridden": {"Type": "String", "Default": "default"},
                "Defaulted": {"Type": "String", "Default": "default"},
                "Redeployed": {"Type": "String", "Default": "new-default"},
                "Previous": {"Type": "String"},
                "Missing": {"Type": "String"}
            },
            "Resources": {}
        }))
        .unwrap();
        let overrides = BTreeMap::from([("Overridden".to_string(), "override".to_string())]);
        let deployed = BTreeMap::from([
            ("Previous".to_string(), "previous".to_string()),
            ("Redeployed".to_string(), "previous".to_string()),
        ]);
        let source = source().with_template_parameters(&template, &overrides, &deployed);

        assert_eq!(
            source.find_parameter_value("Overridden"),
            ParameterLookup::Found("override".to_string())
        );
        assert_eq!(
            source.find_parameter_value("Defaulted"),
            ParameterLookup::Found("default".to_string())
        );
        assert_eq!(
            source.find_parameter_value("Redeployed"),
            ParameterLookup::Found("previous".to_string())
        );
        assert_eq!(
            source.find_parameter_value("Previous"),
            ParameterLookup::Found("previous".to_string())
        );
        assert_eq!(
            source.find_parameter_value("Missing"),
            ParameterLookup::DeclaredWithoutValue
        );
        assert_eq!(
            source.find_parameter_value("Func"),
            ParameterLookup::NotDeclared
        );
        assert_eq!(
            source.find_parameter_value("AWS::Region"),
            ParameterLookup::Found("eu-west-1".to_string())
        );
    }

    #[test]
    fn test_attribute_lookup() {
        let source = source().with_nested_stack_outputs(
            "Nested",
            BTreeMap::from([("BucketName".to_string(), "my-bucket".to_string())]),
        );
        assert_eq!(
            source.find_resource_attribute("Func", "Arn"),
            AttributeLookup::Found(
                "arn:aws:lambda:eu-west-1:123456789012:function:root-Func-ABC".to_string()
            )
        );
        assert_eq!(
            source.find_resource_attribute("Func", "SnapStartResponse"),
            AttributeLookup::Unsupported {
                resource_type: "AWS::Lambda::Function".to_string()
            }
        );
        assert_eq!(
            source.find_resource_attribute("Nested", "Outputs.BucketName"),
            AttributeLookup::Found("my-bucket".to_string())
        );
        assert_eq!(
            source.find_resource_attribute("Missing", "Arn"),
            AttributeLookup::NotFound
        );
    }

    #[test]
    fn test_nested_source_keeps_environment_only() {
        let parent = source().with_exports(BTreeMap::from([(
            "SharedVpc".to_string(),
            "vpc-123".to_string(),
        )]));
        let child = parent.for_nested_stack(
            "root-Nested",
            None,
            vec![LiveResource::new("Inner", "AWS::SQS::Queue", "q")],
        );

        assert_eq!(child.find_resource_physical_id("Func"), None);
        assert_eq!(child.find_resource_physical_id("Inner").as_deref(), Some("q"));
        assert_eq!(child.find_export_value("SharedVpc").as_deref(), Some("vpc-123"));
        assert_eq!(
            child.find_parameter_value("AWS::StackName"),
            ParameterLookup::Found("root-Nested".to_string())
        );
    }
}
