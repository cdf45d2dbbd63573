//! Operation Executors
//!
//! Apply the operations of classified hotswappable changes through a
//! [`HotswapEnvironment`]. Operations of one change run in order; independent changes run
//! concurrently up to the configured limit. Each operation is attempted once and its
//! outcome reported; nothing already applied is rolled back.

use anyhow::{anyhow, bail, Context, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::changes::{HotswappableChange, ResourceOperation};
use super::config::HotswapConfig;
use super::environment::{FunctionUpdateStatus, HotswapEnvironment};

/// Result of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    Succeeded,
    Failed(String),
    /// Not started, because of cancellation or an earlier failure in the same change
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub stack_name: String,
    pub logical_id: String,
    pub description: String,
    pub status: OperationStatus,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Succeeded
    }
}

pub struct OperationExecutor<'a> {
    environment: &'a dyn HotswapEnvironment,
    config: &'a HotswapConfig,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(environment: &'a dyn HotswapEnvironment, config: &'a HotswapConfig) -> Self {
        Self {
            environment,
            config,
        }
    }

    /// Apply every change, preserving the order of `changes` in the returned outcomes.
    ///
    /// Once `cancel` fires, operations already in flight complete and nothing new starts.
    pub async fn apply_all(
        &self,
        changes: &[HotswappableChange],
        cancel: &CancellationToken,
    ) -> Vec<OperationOutcome> {
        let outcomes: Vec<Vec<OperationOutcome>> = stream::iter(
            changes
                .iter()
                .map(|change| self.apply_change(change, cancel)),
        )
        .buffered(self.config.max_concurrency.max(1))
        .collect()
        .await;

        outcomes.into_iter().flatten().collect()
    }

    async fn apply_change(
        &self,
        change: &HotswappableChange,
        cancel: &CancellationToken,
    ) -> Vec<OperationOutcome> {
        let mut outcomes = Vec::with_capacity(change.operations.len());
        let mut failed = false;

        for operation in &change.operations {
            let description = operation.describe();
            let status = if failed {
                OperationStatus::Skipped
            } else if cancel.is_cancelled() {
                log_warn!(
                    "Hotswap cancelled, not starting: {} ({})",
                    description,
                    change.logical_id
                );
                OperationStatus::Skipped
            } else {
                match self.apply(operation).await {
                    Ok(()) => {
                        log_info!(
                            "Hotswapped {}/{}: {}",
                            change.stack_name,
                            change.logical_id,
                            description
                        );
                        OperationStatus::Succeeded
                    }
                    Err(e) => {
                        failed = true;
                        log_warn!(
                            "Hotswap of {}/{} failed: {}: {:#}",
                            change.stack_name,
                            change.logical_id,
                            description,
                            e
                        );
                        OperationStatus::Failed(format!("{:#}", e))
                    }
                }
            };

            outcomes.push(OperationOutcome {
                stack_name: change.stack_name.clone(),
                logical_id: change.logical_id.clone(),
                description,
                status,
            });
        }

        outcomes
    }

    /// Perform a single operation
    pub async fn apply(&self, operation: &ResourceOperation) -> Result<()> {
        match operation {
            ResourceOperation::UpdateLambdaCode {
                function_name,
                code,
            } => {
                self.environment
                    .update_function_code(function_name, code)
                    .await
                    .with_context(|| format!("UpdateFunctionCode failed for {}", function_name))?;
                self.wait_for_function_update(function_name).await
            }
            ResourceOperation::UpdateLambdaConfiguration {
                function_name,
                update,
            } => {
                self.environment
                    .update_function_configuration(function_name, update)
                    .await
                    .with_context(|| {
                        format!("UpdateFunctionConfiguration failed for {}", function_name)
                    })?;
                self.wait_for_function_update(function_name).await
            }
            ResourceOperation::UpdateStateMachine {
                state_machine_arn,
                definition,
            } => self
                .environment
                .update_state_machine(state_machine_arn, definition)
                .await
                .with_context(|| format!("UpdateStateMachine failed for {}", state_machine_arn)),
            ResourceOperation::RegisterTaskDefinitionAndUpdateServices {
                family,
                task_definition,
                services,
            } => {
                let revision = self
                    .environment
                    .register_task_definition(family, task_definition)
                    .await
                    .with_context(|| format!("RegisterTaskDefinition failed for {}", family))?;
                log_debug!("Registered task definition revision {}", revision);

                let settings = self.config.ecs_deployment_settings();
                for target in services {
                    self.environment
                        .update_service(&target.cluster, &target.service, &revision, &settings)
                        .await
                        .with_context(|| {
                            format!(
                                "UpdateService failed for {} in cluster {}",
                                target.service, target.cluster
                            )
                        })?;
                }
                Ok(())
            }
            ResourceOperation::InvokeCustomResource {
                function_name,
                event,
            } => self.invoke_custom_resource(function_name, event).await,
        }
    }

    async fn invoke_custom_resource(&self, function_name: &str, event: &Value) -> Result<()> {
        let mut event = event.clone();
        if let Value::Object(fields) = &mut event {
            fields.insert(
                "RequestId".to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }

        let response = self
            .environment
            .invoke_function(function_name, &event)
            .await
            .with_context(|| format!("Invoke failed for {}", function_name))?;

        if let Some(function_error) = response.function_error {
            let detail = response
                .payload
                .map(|p| p.to_string())
                .unwrap_or_default();
            bail!(
                "custom resource provider {} returned {} error: {}",
                function_name,
                function_error,
                detail
            );
        }
        Ok(())
    }

    /// Poll until the function's last update has finished, so that the next update of the
    /// same function is not rejected as conflicting
    async fn wait_for_function_update(&self, function_name: &str) -> Result<()> {
        if !self.config.wait_for_lambda_update {
            return Ok(());
        }

        let poll = async {
            loop {
                match self
                    .environment
                    .get_function_update_status(function_name)
                    .await?
                {
                    FunctionUpdateStatus::Successful => return Ok::<(), anyhow::Error>(()),
                    FunctionUpdateStatus::Failed(reason) => {
                        return Err(anyhow!("update of {} failed: {}", function_name, reason))
                    }
                    FunctionUpdateStatus::InProgress => {
                        trace_debug!("Waiting for update of {} to finish", function_name);
                        tokio::time::sleep(self.config.lambda_poll_interval()).await;
                    }
                }
            }
        };

        tokio::time::timeout(self.config.lambda_update_timeout(), poll)
            .await
            .map_err(|_| {
                anyhow!(
                    "timed out after {}s waiting for update of {}",
                    self.config.lambda_update_timeout_secs,
                    function_name
                )
            })?
    }
}
