//! Hotswap Orchestrator
//!
//! Resolves the full stack tree, decides whether the deployment can be hotswapped as a
//! whole and, only then, hands the collected operations to the executors. A single
//! non-hotswappable change anywhere in the tree vetoes the whole hotswap; nothing is
//! applied in that case.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::changes::{HotswappableChange, NonHotswappableChange};
use super::config::HotswapConfig;
use super::environment::{HotswapEnvironment, TemplateSource};
use super::error::HotswapError;
use super::executors::{OperationExecutor, OperationOutcome};
use super::nested_stacks::{NestedStackResolver, StackNode, TargetStack};
use super::value_source::{DeploymentEnvironment, StackValueSource};

/// Decision state of one orchestration run
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationState {
    /// Walking the stack tree
    Evaluating,
    /// Every change in the tree is hotswappable; operations in application order
    Apply(Vec<HotswappableChange>),
    /// At least one change blocks the hotswap
    FullDeploymentRequired(Vec<NonHotswappableChange>),
}

impl OrchestrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestrationState::FullDeploymentRequired(_))
    }

    pub fn description(&self) -> &'static str {
        match self {
            OrchestrationState::Evaluating => "Evaluating changes",
            OrchestrationState::Apply(_) => "Ready to hotswap",
            OrchestrationState::FullDeploymentRequired(_) => "Full deployment required",
        }
    }

    /// Fold one stack level into the state.
    ///
    /// Hotswappable changes accumulate until the first blocker; from then on only
    /// blockers are collected so the caller sees all of them.
    fn absorb(self, node: &StackNode) -> Self {
        match self {
            OrchestrationState::FullDeploymentRequired(mut blockers) => {
                blockers.extend(node.non_hotswappable.iter().cloned());
                OrchestrationState::FullDeploymentRequired(blockers)
            }
            _ if !node.non_hotswappable.is_empty() => {
                OrchestrationState::FullDeploymentRequired(node.non_hotswappable.clone())
            }
            OrchestrationState::Apply(mut changes) => {
                changes.extend(node.hotswappable.iter().cloned());
                OrchestrationState::Apply(changes)
            }
            OrchestrationState::Evaluating => {
                OrchestrationState::Apply(node.hotswappable.clone())
            }
        }
    }

    /// Depth-first fold over the tree, each parent before its nested stacks
    pub fn from_tree(root: &StackNode) -> Self {
        fn walk(state: OrchestrationState, node: &StackNode) -> OrchestrationState {
            let state = state.absorb(node);
            node.children.values().fold(state, walk)
        }
        match walk(OrchestrationState::Evaluating, root) {
            OrchestrationState::Evaluating => OrchestrationState::Apply(Vec::new()),
            state => state,
        }
    }
}

/// Outcome of [`HotswapDeployer::try_hotswap`]
#[derive(Debug)]
pub enum HotswapResult {
    /// Per-operation outcomes; may include failures, nothing is rolled back
    Applied(Vec<OperationOutcome>),
    /// The caller should run a normal deployment instead
    FullDeploymentRequired(Vec<NonHotswappableChange>),
    Error(HotswapError),
}

impl HotswapResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, HotswapResult::Applied(_))
    }

    /// Applied with every operation succeeded
    pub fn is_fully_successful(&self) -> bool {
        match self {
            HotswapResult::Applied(outcomes) => outcomes.iter().all(OperationOutcome::is_success),
            _ => false,
        }
    }
}

/// Entry point of the hotswap engine
pub struct HotswapDeployer {
    templates: Arc<dyn TemplateSource>,
    environment: Arc<dyn HotswapEnvironment>,
    deployment: DeploymentEnvironment,
    config: HotswapConfig,
}

impl HotswapDeployer {
    pub fn new(
        templates: Arc<dyn TemplateSource>,
        environment: Arc<dyn HotswapEnvironment>,
        deployment: DeploymentEnvironment,
    ) -> Self {
        Self {
            templates,
            environment,
            deployment,
            config: HotswapConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HotswapConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HotswapConfig {
        &self.config
    }

    /// Resolve and classify the whole tree without applying anything
    pub async fn resolve_tree(
        &self,
        root_stack_name: &str,
        target: &TargetStack,
        parameter_overrides: &BTreeMap<String, String>,
    ) -> Result<StackNode, HotswapError> {
        let exports = match self.templates.list_exports().await {
            Ok(exports) => exports,
            Err(e) => {
                log_warn!("Could not list exports, Fn::ImportValue will not resolve: {:#}", e);
                BTreeMap::new()
            }
        };
        let seed = StackValueSource::new(root_stack_name, self.deployment.clone(), Vec::new())
            .with_exports(exports);

        NestedStackResolver::new(self.templates.as_ref())
            .resolve(root_stack_name, target, &seed, parameter_overrides)
            .await
    }

    /// Decide between hotswap and full deployment
    pub async fn plan(
        &self,
        root_stack_name: &str,
        target: &TargetStack,
        parameter_overrides: &BTreeMap<String, String>,
    ) -> Result<OrchestrationState, HotswapError> {
        let tree = self
            .resolve_tree(root_stack_name, target, parameter_overrides)
            .await?;
        let state = OrchestrationState::from_tree(&tree);
        log_debug!(
            "Plan for {} across {} stack(s): {}",
            root_stack_name,
            tree.stack_count(),
            state.description()
        );
        Ok(state)
    }

    pub async fn try_hotswap(
        &self,
        root_stack_name: &str,
        target: &TargetStack,
        parameter_overrides: &BTreeMap<String, String>,
    ) -> HotswapResult {
        self.try_hotswap_with_cancellation(
            root_stack_name,
            target,
            parameter_overrides,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`Self::try_hotswap`]; once `cancel` fires, operations in flight finish and
    /// the remaining ones are reported as skipped
    pub async fn try_hotswap_with_cancellation(
        &self,
        root_stack_name: &str,
        target: &TargetStack,
        parameter_overrides: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> HotswapResult {
        log_info!("Evaluating hotswap of stack {}", root_stack_name);

        let state = match self.plan(root_stack_name, target, parameter_overrides).await {
            Ok(state) => state,
            Err(e) => {
                log_error!("Hotswap of {} failed: {}", root_stack_name, e);
                return HotswapResult::Error(e);
            }
        };

        match state {
            OrchestrationState::FullDeploymentRequired(blockers) => {
                for blocker in &blockers {
                    log_warn!("Not hotswappable: {}", blocker);
                }
                log_info!(
                    "Stack {} requires a full deployment ({} blocking change(s))",
                    root_stack_name,
                    blockers.len()
                );
                HotswapResult::FullDeploymentRequired(blockers)
            }
            OrchestrationState::Apply(changes) => {
                let operations: usize = changes.iter().map(|c| c.operations.len()).sum();
                log_info!(
                    "Hotswapping {} change(s) ({} operation(s)) in stack {}",
                    changes.len(),
                    operations,
                    root_stack_name
                );

                let executor = OperationExecutor::new(self.environment.as_ref(), &self.config);
                let outcomes = executor.apply_all(&changes, cancel).await;

                let failed = outcomes.iter().filter(|o| !o.is_success()).count();
                log_info!(
                    "Hotswap of {} finished: {} succeeded, {} failed or skipped",
                    root_stack_name,
                    outcomes.len() - failed,
                    failed
                );
                HotswapResult::Applied(outcomes)
            }
            OrchestrationState::Evaluating => HotswapResult::Applied(Vec::new()),
        }
    }
}
