//! Nested Stack Resolver
//!
//! Builds a [`StackNode`] tree by diffing and classifying one stack level, then recursing
//! into every `AWS::CloudFormation::Stack` resource that exists on both sides. Each level
//! gets its own [`StackValueSource`], derived from its parent's and bound to the
//! parameters the parent passes in. Sibling subtrees are resolved concurrently and do not
//! influence each other's classification.

use anyhow::Context;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::collections::BTreeMap;

use super::changes::{Classification, HotswappableChange, NonHotswappableChange};
use super::classifier::{classify, ClassificationContext};
use super::diff::diff;
use super::environment::TemplateSource;
use super::error::HotswapError;
use super::evaluator::ExpressionEvaluator;
use super::value_source::StackValueSource;
use crate::app::cfn_intrinsic_functions::Expression;
use crate::app::cfn_template::{scalar_to_string, RenderedTemplate, Resource, NESTED_STACK_TYPE};

/// The target template of a stack together with the target templates of its nested
/// stacks, keyed by the logical ID of the nested stack resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetStack {
    pub template: RenderedTemplate,
    pub nested: BTreeMap<String, TargetStack>,
}

impl TargetStack {
    pub fn new(template: RenderedTemplate) -> Self {
        Self {
            template,
            nested: BTreeMap::new(),
        }
    }

    pub fn with_nested(mut self, logical_id: impl Into<String>, nested: TargetStack) -> Self {
        self.nested.insert(logical_id.into(), nested);
        self
    }
}

/// Classified changes of one stack level and its nested stacks
#[derive(Debug, Clone)]
pub struct StackNode {
    pub stack_name: String,
    pub physical_arn: Option<String>,
    pub current_template: RenderedTemplate,
    pub target_template: RenderedTemplate,
    pub hotswappable: Vec<HotswappableChange>,
    pub non_hotswappable: Vec<NonHotswappableChange>,
    pub children: BTreeMap<String, StackNode>,
}

impl StackNode {
    /// Whether nothing in this subtree blocks a hotswap
    pub fn is_hotswappable(&self) -> bool {
        self.non_hotswappable.is_empty() && self.children.values().all(StackNode::is_hotswappable)
    }

    /// Number of stacks in this subtree, this one included
    pub fn stack_count(&self) -> usize {
        1 + self.children.values().map(StackNode::stack_count).sum::<usize>()
    }
}

pub struct NestedStackResolver<'a> {
    templates: &'a dyn TemplateSource,
}

impl<'a> NestedStackResolver<'a> {
    pub fn new(templates: &'a dyn TemplateSource) -> Self {
        Self { templates }
    }

    /// Resolve the tree rooted at `root_stack_name`.
    ///
    /// `seed` supplies the deployment environment and exports; `parameter_overrides` are
    /// the caller's values for the root template's parameters.
    pub async fn resolve(
        &self,
        root_stack_name: &str,
        target: &TargetStack,
        seed: &StackValueSource,
        parameter_overrides: &BTreeMap<String, String>,
    ) -> Result<StackNode, HotswapError> {
        self.resolve_stack(
            root_stack_name.to_string(),
            root_stack_name.to_string(),
            target,
            seed,
            parameter_overrides.clone(),
        )
        .await
    }

    fn resolve_stack<'b>(
        &'b self,
        stack_name: String,
        stack_ref: String,
        target: &'b TargetStack,
        parent: &'b StackValueSource,
        bindings: BTreeMap<String, String>,
    ) -> BoxFuture<'b, Result<StackNode, HotswapError>> {
        async move {
            let description = self
                .templates
                .describe_stack(&stack_ref)
                .await
                .with_context(|| format!("Failed to describe stack {}", stack_name))?
                .ok_or_else(|| HotswapError::StackNotFound(stack_name.clone()))?;

            let (current, live) = futures::try_join!(
                async {
                    self.templates
                        .get_deployed_template(&stack_ref)
                        .await
                        .with_context(|| format!("Failed to read template of stack {}", stack_name))
                },
                async {
                    self.templates
                        .get_resource_summaries(&stack_ref)
                        .await
                        .with_context(|| format!("Failed to list resources of stack {}", stack_name))
                },
            )?;

            let mut source = parent
                .for_nested_stack(stack_name.clone(), Some(description.stack_id.clone()), live)
                .with_template_parameters(&target.template, &bindings, &description.parameters);
            for (logical_id, outputs) in self.nested_stack_outputs(&source, &target.template).await? {
                source = source.with_nested_stack_outputs(logical_id, outputs);
            }

            let mut hotswappable = Vec::new();
            let mut non_hotswappable = Vec::new();
            {
                let ctx = ClassificationContext {
                    stack_name: &stack_name,
                    source: &source,
                    current_template: &current,
                    target_template: &target.template,
                };
                for change in diff(&current, &target.template) {
                    match classify(&change, &ctx)? {
                        Classification::NoOp => {}
                        Classification::Hotswappable(c) => hotswappable.push(c),
                        Classification::NonHotswappable(c) => non_hotswappable.push(c),
                    }
                }
            }

            let mut nested = Vec::new();
            for (logical_id, resource) in &target.template.resources {
                let deployed_as_stack = current
                    .resources
                    .get(logical_id)
                    .is_some_and(Resource::is_nested_stack);
                if !resource.is_nested_stack() || !deployed_as_stack {
                    continue;
                }
                if non_hotswappable.iter().any(|c| &c.logical_id == logical_id) {
                    continue;
                }

                let Some(arn) = source
                    .live_resource(logical_id)
                    .and_then(|r| r.physical_id.clone())
                else {
                    non_hotswappable.push(NonHotswappableChange {
                        stack_name: stack_name.clone(),
                        logical_id: logical_id.clone(),
                        resource_type: NESTED_STACK_TYPE.to_string(),
                        reason: "creating a nested stack is not supported".to_string(),
                    });
                    continue;
                };

                let child_target =
                    target
                        .nested
                        .get(logical_id)
                        .ok_or_else(|| HotswapError::MissingNestedTemplate {
                            stack_name: stack_name.clone(),
                            logical_id: logical_id.clone(),
                        })?;
                let child_bindings = nested_stack_parameters(&stack_name, logical_id, resource, &source)?;
                let child_name = stack_name_from_arn(&arn).unwrap_or(&arn).to_string();

                log_debug!(
                    "Resolving nested stack {} ({}) of {} with {} parameter(s)",
                    logical_id,
                    arn,
                    stack_name,
                    child_bindings.len()
                );
                nested.push((logical_id.clone(), child_name, arn, child_target, child_bindings));
            }

            let resolutions = join_all(nested.iter().map(
                |(_, child_name, arn, child_target, child_bindings)| {
                    self.resolve_stack(
                        child_name.clone(),
                        arn.clone(),
                        child_target,
                        &source,
                        child_bindings.clone(),
                    )
                },
            ))
            .await;

            let mut children = BTreeMap::new();
            for ((logical_id, ..), resolution) in nested.iter().zip(resolutions) {
                children.insert(logical_id.clone(), resolution?);
            }

            log_debug!(
                "Stack {}: {} hotswappable, {} non-hotswappable change(s), {} nested stack(s)",
                stack_name,
                hotswappable.len(),
                non_hotswappable.len(),
                children.len()
            );

            Ok(StackNode {
                stack_name,
                physical_arn: Some(description.stack_id),
                current_template: current,
                target_template: target.template.clone(),
                hotswappable,
                non_hotswappable,
                children,
            })
        }
        .boxed()
    }

    /// Outputs of deployed nested stacks that the target template refers to
    async fn nested_stack_outputs(
        &self,
        source: &StackValueSource,
        target: &RenderedTemplate,
    ) -> Result<Vec<(String, BTreeMap<String, String>)>, HotswapError> {
        let referenced: Vec<(String, String)> = source
            .live_resources()
            .filter(|r| r.resource_type == NESTED_STACK_TYPE)
            .filter(|r| !target.resources_referencing(&r.logical_id).is_empty())
            .filter_map(|r| Some((r.logical_id.clone(), r.physical_id.clone()?)))
            .collect();

        let descriptions = join_all(
            referenced
                .iter()
                .map(|(_, arn)| self.templates.describe_stack(arn)),
        )
        .await;

        let mut outputs = Vec::new();
        for ((logical_id, arn), description) in referenced.into_iter().zip(descriptions) {
            let description = description
                .with_context(|| format!("Failed to read outputs of nested stack {}", arn))?;
            if let Some(description) = description {
                outputs.push((logical_id, description.outputs));
            }
        }
        Ok(outputs)
    }
}

/// Evaluate the `Parameters` property of a nested stack resource against the parent
fn nested_stack_parameters(
    stack_name: &str,
    logical_id: &str,
    resource: &Resource,
    source: &StackValueSource,
) -> Result<BTreeMap<String, String>, HotswapError> {
    let evaluator = ExpressionEvaluator::new(source);
    let unresolvable = |parameter: &str, error| HotswapError::UnresolvableNestedParameter {
        stack_name: stack_name.to_string(),
        logical_id: logical_id.to_string(),
        parameter: parameter.to_string(),
        source: error,
    };

    match resource.properties.get("Parameters") {
        None => Ok(BTreeMap::new()),
        Some(Expression::Map(entries)) => {
            let mut bindings = BTreeMap::new();
            for (name, value) in entries {
                if matches!(value, Expression::Ref(r) if r == "AWS::NoValue") {
                    continue;
                }
                let value = evaluator
                    .evaluate_to_string(value)
                    .map_err(|e| unresolvable(name.as_str(), e))?;
                bindings.insert(name.clone(), value);
            }
            Ok(bindings)
        }
        Some(other) => {
            let value = evaluator
                .evaluate(other)
                .map_err(|e| unresolvable("Parameters", e))?;
            let serde_json::Value::Object(entries) = value else {
                return Err(HotswapError::MalformedTemplate {
                    stack_name: stack_name.to_string(),
                    reason: format!("Parameters of nested stack {} is not a map", logical_id),
                });
            };
            entries
                .iter()
                .map(|(name, value)| {
                    scalar_to_string(value)
                        .map(|v| (name.clone(), v))
                        .ok_or_else(|| HotswapError::MalformedTemplate {
                            stack_name: stack_name.to_string(),
                            reason: format!(
                                "parameter {} of nested stack {} is not a scalar",
                                name, logical_id
                            ),
                        })
                })
                .collect()
        }
    }
}

/// `arn:aws:cloudformation:<region>:<account>:stack/<name>/<id>` -> `<name>`
pub fn stack_name_from_arn(arn: &str) -> Option<&str> {
    let (_, rest) = arn.split_once(":stack/")?;
    rest.split('/').next().filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_name_from_arn() {
        assert_eq!(
            stack_name_from_arn(
                "arn:aws:cloudformation:us-east-1:123456789012:stack/root-Nested-1AB/0f1e2d"
            ),
            Some("root-Nested-1AB")
        );
        assert_eq!(stack_name_from_arn("plain-name"), None);
    }
}
