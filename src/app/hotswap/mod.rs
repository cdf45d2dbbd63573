//! Hotswap deployment engine
//!
//! Flow of one [`HotswapDeployer::try_hotswap`] call:
//!
//! 1. [`nested_stacks`] reads the deployed template and resources of each stack through a
//!    [`TemplateSource`], diffs them against the target ([`diff`]) and classifies every
//!    change ([`classifier`], [`rules`]), recursing into nested stacks.
//! 2. [`orchestrator`] folds the resulting [`StackNode`] tree into an
//!    [`OrchestrationState`]: any blocker anywhere means a full deployment.
//! 3. [`executors`] applies the collected [`ResourceOperation`]s through a
//!    [`HotswapEnvironment`].

pub mod attributes;
pub mod aws;
pub mod changes;
pub mod classifier;
pub mod config;
pub mod diff;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod executors;
pub mod nested_stacks;
pub mod orchestrator;
pub mod rules;
pub mod value_source;

pub use changes::{
    ChangeKind, Classification, EcsServiceTarget, HotswappableChange, LambdaCode,
    LambdaConfigurationUpdate, NonHotswappableChange, ResourceChange, ResourceOperation,
};
pub use config::HotswapConfig;
pub use environment::{
    EcsDeploymentSettings, FunctionUpdateStatus, HotswapEnvironment, InvocationResponse,
    StackDescription, TemplateSource,
};
pub use error::{EvaluationError, HotswapError};
pub use executors::{OperationOutcome, OperationStatus};
pub use nested_stacks::{StackNode, TargetStack};
pub use orchestrator::{HotswapDeployer, HotswapResult, OrchestrationState};
pub use value_source::{DeploymentEnvironment, LiveResource, StackValueSource, ValueSource};
