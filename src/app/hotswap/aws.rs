//! AWS SDK backed collaborators: [`AwsTemplateSource`] over CloudFormation and
//! [`AwsHotswapEnvironment`] over Lambda, Step Functions and ECS.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudformation as cfn;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_ecs as ecs;
use aws_sdk_lambda as lambda;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::LastUpdateStatus;
use aws_sdk_sfn as sfn;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::changes::{LambdaCode, LambdaConfigurationUpdate};
use super::config::EnvironmentConfig;
use super::environment::{
    EcsDeploymentSettings, FunctionUpdateStatus, HotswapEnvironment, InvocationResponse,
    StackDescription, TemplateSource,
};
use super::rules::ecs_task_definition::{LOG_CONFIGURATION_PROPERTIES, PORT_MAPPING_PROPERTIES};
use super::value_source::{DeploymentEnvironment, LiveResource};
use crate::app::cfn_template::{scalar_to_string, RenderedTemplate};

/// Load the SDK configuration from the default provider chain
pub async fn load_sdk_config() -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest()).load().await
}

/// Account and region of the loaded credentials
pub async fn load_deployment_environment(
    config: &SdkConfig,
    settings: &EnvironmentConfig,
) -> Result<DeploymentEnvironment> {
    let region = config
        .region()
        .map(|r| r.to_string())
        .ok_or_else(|| anyhow!("No AWS region configured"))?;

    let identity = aws_sdk_sts::Client::new(config)
        .get_caller_identity()
        .send()
        .await
        .with_context(|| "Failed to get caller identity")?;
    let account_id = identity
        .account()
        .ok_or_else(|| anyhow!("No account in caller identity"))?;

    log_debug!("Deploying to account {} in region {}", account_id, region);
    Ok(DeploymentEnvironment {
        account_id: account_id.to_string(),
        region,
        partition: settings.partition.clone(),
        url_suffix: settings.url_suffix.clone(),
    })
}

/// Reads deployed stacks through the CloudFormation API
pub struct AwsTemplateSource {
    client: cfn::Client,
}

impl AwsTemplateSource {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: cfn::Client::new(config),
        }
    }
}

#[async_trait]
impl TemplateSource for AwsTemplateSource {
    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>> {
        let response = match self.client.describe_stacks().stack_name(stack).send().await {
            Ok(response) => response,
            Err(sdk_error) => {
                if let Some(service_error) = sdk_error.as_service_error() {
                    let missing = service_error.code() == Some("ValidationError")
                        && service_error
                            .message()
                            .is_some_and(|m| m.contains("does not exist"));
                    if missing {
                        log_debug!("Stack {} does not exist", stack);
                        return Ok(None);
                    }
                }
                return Err(sdk_error)
                    .with_context(|| format!("Failed to describe stack {}", stack));
            }
        };

        let Some(description) = response.stacks().first() else {
            return Ok(None);
        };

        let parameters = description
            .parameters()
            .iter()
            .filter_map(|p| {
                let value = p.resolved_value().or(p.parameter_value())?;
                Some((p.parameter_key()?.to_string(), value.to_string()))
            })
            .collect();
        let outputs = description
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect();

        Ok(Some(StackDescription {
            stack_id: description.stack_id().unwrap_or(stack).to_string(),
            parameters,
            outputs,
        }))
    }

    async fn get_deployed_template(&self, stack: &str) -> Result<RenderedTemplate> {
        let response = self
            .client
            .get_template()
            .stack_name(stack)
            .template_stage(cfn::types::TemplateStage::Original)
            .send()
            .await
            .with_context(|| format!("Failed to get template of stack {}", stack))?;

        let body = response
            .template_body()
            .ok_or_else(|| anyhow!("Stack {} returned an empty template", stack))?;
        if body.trim_start().starts_with('{') {
            RenderedTemplate::from_json(body)
        } else {
            RenderedTemplate::from_yaml(body)
        }
        .with_context(|| format!("Failed to parse deployed template of stack {}", stack))
    }

    async fn get_resource_summaries(&self, stack: &str) -> Result<Vec<LiveResource>> {
        let mut paginator = self
            .client
            .list_stack_resources()
            .stack_name(stack)
            .into_paginator()
            .send();

        let mut resources = Vec::new();
        while let Some(page) = paginator.next().await {
            let page =
                page.with_context(|| format!("Failed to list resources of stack {}", stack))?;
            for summary in page.stack_resource_summaries() {
                let (Some(logical_id), Some(resource_type)) =
                    (summary.logical_resource_id(), summary.resource_type())
                else {
                    continue;
                };
                resources.push(LiveResource {
                    logical_id: logical_id.to_string(),
                    resource_type: resource_type.to_string(),
                    physical_id: summary.physical_resource_id().map(str::to_string),
                });
            }
        }

        log_debug!("Stack {} has {} live resource(s)", stack, resources.len());
        Ok(resources)
    }

    async fn list_exports(&self) -> Result<BTreeMap<String, String>> {
        let mut paginator = self.client.list_exports().into_paginator().send();

        let mut exports = BTreeMap::new();
        while let Some(page) = paginator.next().await {
            let page = page.with_context(|| "Failed to list exports")?;
            for export in page.exports() {
                if let (Some(name), Some(value)) = (export.name(), export.value()) {
                    exports.insert(name.to_string(), value.to_string());
                }
            }
        }
        Ok(exports)
    }
}

/// Applies hotswap operations through the service APIs
pub struct AwsHotswapEnvironment {
    lambda: lambda::Client,
    sfn: sfn::Client,
    ecs: ecs::Client,
}

impl AwsHotswapEnvironment {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            lambda: lambda::Client::new(config),
            sfn: sfn::Client::new(config),
            ecs: ecs::Client::new(config),
        }
    }
}

#[async_trait]
impl HotswapEnvironment for AwsHotswapEnvironment {
    async fn update_function_code(&self, function_name: &str, code: &LambdaCode) -> Result<()> {
        let request = self.lambda.update_function_code().function_name(function_name);
        let request = match code {
            LambdaCode::S3 {
                bucket,
                key,
                object_version,
            } => request
                .s3_bucket(bucket)
                .s3_key(key)
                .set_s3_object_version(object_version.clone()),
            LambdaCode::Image { image_uri } => request.image_uri(image_uri),
            LambdaCode::ZipFile(bytes) => request.zip_file(Blob::new(bytes.clone())),
        };
        request.send().await?;
        Ok(())
    }

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &LambdaConfigurationUpdate,
    ) -> Result<()> {
        let environment = update.environment.as_ref().map(|variables| {
            lambda::types::Environment::builder()
                .set_variables(Some(
                    variables
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<HashMap<_, _>>(),
                ))
                .build()
        });

        self.lambda
            .update_function_configuration()
            .function_name(function_name)
            .set_description(update.description.clone())
            .set_environment(environment)
            .send()
            .await?;
        Ok(())
    }

    async fn get_function_update_status(&self, function_name: &str) -> Result<FunctionUpdateStatus> {
        let configuration = self
            .lambda
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await?;

        Ok(match configuration.last_update_status() {
            Some(LastUpdateStatus::InProgress) => FunctionUpdateStatus::InProgress,
            Some(LastUpdateStatus::Failed) => FunctionUpdateStatus::Failed(
                configuration
                    .last_update_status_reason()
                    .unwrap_or("no reason given")
                    .to_string(),
            ),
            _ => FunctionUpdateStatus::Successful,
        })
    }

    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<InvocationResponse> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .lambda
            .invoke()
            .function_name(function_name)
            .payload(Blob::new(body))
            .send()
            .await?;

        let payload = response
            .payload()
            .filter(|blob| !blob.as_ref().is_empty())
            .map(|blob| {
                serde_json::from_slice(blob.as_ref()).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(blob.as_ref()).into_owned())
                })
            });

        Ok(InvocationResponse {
            payload,
            function_error: response.function_error().map(str::to_string),
        })
    }

    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()> {
        self.sfn
            .update_state_machine()
            .state_machine_arn(state_machine_arn)
            .definition(definition)
            .send()
            .await?;
        Ok(())
    }

    async fn register_task_definition(&self, family: &str, properties: &Value) -> Result<String> {
        let request = task_definition_request(
            self.ecs.register_task_definition().family(family),
            properties,
        )?;
        let response = request.send().await?;

        response
            .task_definition()
            .and_then(|td| td.task_definition_arn())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("RegisterTaskDefinition returned no revision for {}", family))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
        settings: &EcsDeploymentSettings,
    ) -> Result<()> {
        let deployment_configuration = ecs::types::DeploymentConfiguration::builder()
            .set_minimum_healthy_percent(settings.minimum_healthy_percent)
            .set_maximum_percent(settings.maximum_healthy_percent)
            .build();

        self.ecs
            .update_service()
            .cluster(cluster)
            .service(service)
            .task_definition(task_definition_arn)
            .force_new_deployment(true)
            .deployment_configuration(deployment_configuration)
            .send()
            .await?;
        Ok(())
    }
}

type RegisterTaskDefinition = ecs::operation::register_task_definition::builders::RegisterTaskDefinitionFluentBuilder;

/// Translate evaluated `AWS::ECS::TaskDefinition` properties into a registration request.
///
/// Properties outside the supported set fail the call rather than registering a revision
/// that silently drops them.
fn task_definition_request(
    mut request: RegisterTaskDefinition,
    properties: &Value,
) -> Result<RegisterTaskDefinition> {
    let Value::Object(properties) = properties else {
        bail!("task definition properties are not an object");
    };

    for (name, value) in properties {
        request = match name.as_str() {
            "Family" | "Tags" => request,
            "Cpu" => request.cpu(string_field(name, value)?),
            "Memory" => request.memory(string_field(name, value)?),
            "TaskRoleArn" => request.task_role_arn(string_field(name, value)?),
            "ExecutionRoleArn" => request.execution_role_arn(string_field(name, value)?),
            "NetworkMode" => {
                request.network_mode(ecs::types::NetworkMode::from(string_field(name, value)?.as_str()))
            }
            "RequiresCompatibilities" => request.set_requires_compatibilities(Some(
                string_list(name, value)?
                    .iter()
                    .map(|c| ecs::types::Compatibility::from(c.as_str()))
                    .collect(),
            )),
            "ContainerDefinitions" => {
                let Value::Array(containers) = value else {
                    bail!("ContainerDefinitions is not a list");
                };
                let definitions = containers
                    .iter()
                    .map(container_definition)
                    .collect::<Result<Vec<_>>>()?;
                request.set_container_definitions(Some(definitions))
            }
            other => bail!("task definition property {} is not supported for hotswapping", other),
        };
    }

    if let Some(Value::Array(tags)) = properties.get("Tags") {
        for tag in tags {
            request = request.tags(
                ecs::types::Tag::builder()
                    .set_key(tag.get("Key").and_then(scalar_to_string))
                    .set_value(tag.get("Value").and_then(scalar_to_string))
                    .build(),
            );
        }
    }

    Ok(request)
}

fn container_definition(value: &Value) -> Result<ecs::types::ContainerDefinition> {
    let Value::Object(fields) = value else {
        bail!("container definition is not an object");
    };

    let mut builder = ecs::types::ContainerDefinition::builder();
    for (name, value) in fields {
        builder = match name.as_str() {
            "Name" => builder.name(string_field(name, value)?),
            "Image" => builder.image(string_field(name, value)?),
            "WorkingDirectory" => builder.working_directory(string_field(name, value)?),
            "Cpu" => builder.cpu(int_field(name, value)?),
            "Memory" => builder.memory(int_field(name, value)?),
            "MemoryReservation" => builder.memory_reservation(int_field(name, value)?),
            "Essential" => builder.essential(bool_field(name, value)?),
            "Command" => builder.set_command(Some(string_list(name, value)?)),
            "EntryPoint" => builder.set_entry_point(Some(string_list(name, value)?)),
            "Environment" => {
                let mut builder = builder;
                for variable in value.as_array().into_iter().flatten() {
                    builder = builder.environment(
                        ecs::types::KeyValuePair::builder()
                            .set_name(variable.get("Name").and_then(scalar_to_string))
                            .set_value(variable.get("Value").and_then(scalar_to_string))
                            .build(),
                    );
                }
                builder
            }
            "PortMappings" => {
                let mut builder = builder;
                for mapping in value.as_array().into_iter().flatten() {
                    builder = builder.port_mappings(port_mapping(mapping)?);
                }
                builder
            }
            "LogConfiguration" => builder.log_configuration(log_configuration(value)?),
            other => bail!("container property {} is not supported for hotswapping", other),
        };
    }
    Ok(builder.build())
}

/// Classification rejects these already; a field reaching here would otherwise be dropped
fn reject_unknown_fields(kind: &str, value: &Value, allowed: &[&str]) -> Result<()> {
    let Value::Object(fields) = value else {
        bail!("{} is not an object", kind);
    };
    match fields.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(name) => bail!("{} property {} is not supported for hotswapping", kind, name),
        None => Ok(()),
    }
}

fn port_mapping(value: &Value) -> Result<ecs::types::PortMapping> {
    reject_unknown_fields("port mapping", value, PORT_MAPPING_PROPERTIES)?;
    let mut builder = ecs::types::PortMapping::builder();
    if let Some(port) = value.get("ContainerPort") {
        builder = builder.container_port(int_field("ContainerPort", port)?);
    }
    if let Some(port) = value.get("HostPort") {
        builder = builder.host_port(int_field("HostPort", port)?);
    }
    if let Some(protocol) = value.get("Protocol") {
        builder = builder.protocol(ecs::types::TransportProtocol::from(
            string_field("Protocol", protocol)?.as_str(),
        ));
    }
    Ok(builder.build())
}

fn log_configuration(value: &Value) -> Result<ecs::types::LogConfiguration> {
    reject_unknown_fields("log configuration", value, LOG_CONFIGURATION_PROPERTIES)?;
    let driver = value
        .get("LogDriver")
        .ok_or_else(|| anyhow!("LogConfiguration without LogDriver"))?;
    let options = value
        .get("Options")
        .and_then(Value::as_object)
        .map(|options| {
            options
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), scalar_to_string(v)?)))
                .collect::<HashMap<_, _>>()
        });

    ecs::types::LogConfiguration::builder()
        .log_driver(ecs::types::LogDriver::from(
            string_field("LogDriver", driver)?.as_str(),
        ))
        .set_options(options)
        .build()
        .with_context(|| "Invalid LogConfiguration")
}

fn string_field(name: &str, value: &Value) -> Result<String> {
    scalar_to_string(value).ok_or_else(|| anyhow!("{} is not a scalar", name))
}

fn int_field(name: &str, value: &Value) -> Result<i32> {
    string_field(name, value)?
        .parse()
        .with_context(|| format!("{} is not an integer", name))
}

fn bool_field(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => string_field(name, other)?
            .parse()
            .with_context(|| format!("{} is not a boolean", name)),
    }
}

fn string_list(name: &str, value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items.iter().map(|item| string_field(name, item)).collect(),
        _ => bail!("{} is not a list", name),
    }
}
