//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use cfn_hotswap::app::cfn_template::RenderedTemplate;
use cfn_hotswap::app::hotswap::{
    DeploymentEnvironment, EcsDeploymentSettings, FunctionUpdateStatus, HotswapEnvironment,
    InvocationResponse, LambdaCode, LambdaConfigurationUpdate, LiveResource, StackDescription,
    TemplateSource,
};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "us-east-1";

pub fn environment() -> DeploymentEnvironment {
    DeploymentEnvironment::new(ACCOUNT, REGION)
}

pub fn template(value: Value) -> RenderedTemplate {
    RenderedTemplate::from_value(value).unwrap()
}

pub fn stack_arn(name: &str) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{}/0f1e2d3c-aaaa-bbbb-cccc-000000000000",
        REGION, ACCOUNT, name
    )
}

#[derive(Debug, Clone)]
struct FakeStack {
    description: StackDescription,
    template: RenderedTemplate,
    resources: Vec<LiveResource>,
}

/// Deployed stacks, addressable by name or ARN
#[derive(Default)]
pub struct FakeTemplateSource {
    stacks: BTreeMap<String, FakeStack>,
    exports: BTreeMap<String, String>,
    reads: Mutex<Vec<String>>,
}

impl FakeTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stack(
        mut self,
        name: &str,
        template: RenderedTemplate,
        resources: Vec<LiveResource>,
    ) -> Self {
        self.insert(name, template, resources, BTreeMap::new(), BTreeMap::new());
        self
    }

    pub fn with_stack_details(
        mut self,
        name: &str,
        template: RenderedTemplate,
        resources: Vec<LiveResource>,
        parameters: BTreeMap<String, String>,
        outputs: BTreeMap<String, String>,
    ) -> Self {
        self.insert(name, template, resources, parameters, outputs);
        self
    }

    pub fn with_export(mut self, name: &str, value: &str) -> Self {
        self.exports.insert(name.to_string(), value.to_string());
        self
    }

    /// Stacks whose template was read, in order
    pub fn template_reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }

    fn insert(
        &mut self,
        name: &str,
        template: RenderedTemplate,
        resources: Vec<LiveResource>,
        parameters: BTreeMap<String, String>,
        outputs: BTreeMap<String, String>,
    ) {
        let stack = FakeStack {
            description: StackDescription {
                stack_id: stack_arn(name),
                parameters,
                outputs,
            },
            template,
            resources,
        };
        self.stacks.insert(stack_arn(name), stack.clone());
        self.stacks.insert(name.to_string(), stack);
    }

    fn stack(&self, stack: &str) -> Result<&FakeStack> {
        match self.stacks.get(stack) {
            Some(s) => Ok(s),
            None => bail!("Stack with id {} does not exist", stack),
        }
    }
}

#[async_trait]
impl TemplateSource for FakeTemplateSource {
    async fn describe_stack(&self, stack: &str) -> Result<Option<StackDescription>> {
        Ok(self.stacks.get(stack).map(|s| s.description.clone()))
    }

    async fn get_deployed_template(&self, stack: &str) -> Result<RenderedTemplate> {
        self.reads.lock().unwrap().push(stack.to_string());
        Ok(self.stack(stack)?.template.clone())
    }

    async fn get_resource_summaries(&self, stack: &str) -> Result<Vec<LiveResource>> {
        Ok(self.stack(stack)?.resources.clone())
    }

    async fn list_exports(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.exports.clone())
    }
}

/// A call made through the environment
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UpdateFunctionCode {
        function_name: String,
        code: LambdaCode,
    },
    UpdateFunctionConfiguration {
        function_name: String,
        update: LambdaConfigurationUpdate,
    },
    Invoke {
        function_name: String,
        payload: Value,
    },
    UpdateStateMachine {
        arn: String,
        definition: String,
    },
    RegisterTaskDefinition {
        family: String,
        properties: Value,
    },
    UpdateService {
        cluster: String,
        service: String,
        task_definition_arn: String,
    },
}

/// Records every mutating call; calls naming a target in `failing` fail
#[derive(Default)]
pub struct RecordingEnvironment {
    calls: Mutex<Vec<Call>>,
    failing: BTreeSet<String>,
    function_errors: BTreeSet<String>,
}

impl RecordingEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call whose function name, state machine ARN, family or service is `target`
    pub fn failing(mut self, target: &str) -> Self {
        self.failing.insert(target.to_string());
        self
    }

    /// Make invocations of `function_name` report a function error
    pub fn with_function_error(mut self, function_name: &str) -> Self {
        self.function_errors.insert(function_name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, target: &str, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(target) {
            bail!("simulated failure for {}", target);
        }
        Ok(())
    }
}

#[async_trait]
impl HotswapEnvironment for RecordingEnvironment {
    async fn update_function_code(&self, function_name: &str, code: &LambdaCode) -> Result<()> {
        self.record(
            function_name,
            Call::UpdateFunctionCode {
                function_name: function_name.to_string(),
                code: code.clone(),
            },
        )
    }

    async fn update_function_configuration(
        &self,
        function_name: &str,
        update: &LambdaConfigurationUpdate,
    ) -> Result<()> {
        self.record(
            function_name,
            Call::UpdateFunctionConfiguration {
                function_name: function_name.to_string(),
                update: update.clone(),
            },
        )
    }

    async fn get_function_update_status(&self, _function_name: &str) -> Result<FunctionUpdateStatus> {
        Ok(FunctionUpdateStatus::Successful)
    }

    async fn invoke_function(&self, function_name: &str, payload: &Value) -> Result<InvocationResponse> {
        self.record(
            function_name,
            Call::Invoke {
                function_name: function_name.to_string(),
                payload: payload.clone(),
            },
        )?;
        if self.function_errors.contains(function_name) {
            return Ok(InvocationResponse {
                payload: Some(serde_json::json!({"errorMessage": "AccessDenied"})),
                function_error: Some("Unhandled".to_string()),
            });
        }
        Ok(InvocationResponse::default())
    }

    async fn update_state_machine(&self, state_machine_arn: &str, definition: &str) -> Result<()> {
        self.record(
            state_machine_arn,
            Call::UpdateStateMachine {
                arn: state_machine_arn.to_string(),
                definition: definition.to_string(),
            },
        )
    }

    async fn register_task_definition(&self, family: &str, properties: &Value) -> Result<String> {
        self.record(
            family,
            Call::RegisterTaskDefinition {
                family: family.to_string(),
                properties: properties.clone(),
            },
        )?;
        Ok(format!(
            "arn:aws:ecs:{}:{}:task-definition/{}:4",
            REGION, ACCOUNT, family
        ))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition_arn: &str,
        _settings: &EcsDeploymentSettings,
    ) -> Result<()> {
        self.record(
            service,
            Call::UpdateService {
                cluster: cluster.to_string(),
                service: service.to_string(),
                task_definition_arn: task_definition_arn.to_string(),
            },
        )
    }
}
