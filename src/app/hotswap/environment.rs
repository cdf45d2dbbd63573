//! Collaborator interfaces consumed by the hotswap engine.
//!
//! [`TemplateSource`] reads what is deployed; [`HotswapEnvironment`] performs the service
//! calls of the operation executors. Both are opaque: retries, timeouts, authentication
//! and pagination belong to the implementation. [`super::aws`] provides the SDK backed
//! implementations; tests use in-memory ones.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use super::changes::{LambdaCode, LambdaConfigurationUpdate};
use super::value_source::LiveResource;
use crate::app::cfn_template::RenderedTemplate;

/// Summary of a deployed stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub stack_id: String,
    /// Parameter values the stack is currently deployed with
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

/// Read-only access to deployed stacks. `stack` is a stack name or stack ARN.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// `Ok(None)` when the stack does not exist
    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>>;

    async fn get_deployed_template(&self, stack: &str) -> Result<RenderedTemplate>;

    async fn get_resource_summaries(&self, stack: &str) -> Result<Vec<LiveResource>>;

    /// Exported output values of the account and region, by export name
    async fn list_exports(&self) -> Result<BTreeMap<String, String>>;
}

/// Progress of the last update of a Lambda function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionUpdateStatus {
    Successful,
    InProgress,
    Failed(String),
}

/// Response of a synchronous function invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationResponse {
    pub payload: Option<Value>,
    /// Set when the function raised an error (`Handled` / `Unhandled`)
    pub function_error: Option<String>,
}

/// ECS deployment settings applied when a service moves to a new revision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EcsDeploymentSettings {
    pub minimum_healthy_percent: Option<i32>,
    pub maximum_healthy_percent: Option<i32>,
}

/// Target environment API client
#[async_trait]
pub trait HotswapEnvironment: Send + Sync {
    async fn update_function_code(&self, function_name: &str, code: &LambdaCode) -> Result<()>;

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &LambdaConfigurationUpdate,
    ) -> Result<()>;

    async fn get_function_update_status(&self, function_name: &str) -> Result<FunctionUpdateStatus>;

    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<InvocationResponse>;

    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()>;

    /// Register a new revision from template-style properties; returns the revision ARN
    async fn register_task_definition(&self, family: &str, properties: &Value) -> Result<String>;

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
        settings: &EcsDeploymentSettings,
    ) -> Result<()>;
}
