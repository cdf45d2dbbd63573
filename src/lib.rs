//! cfn-hotswap - direct application of CloudFormation template changes to live resources
//!
//! Given the template currently deployed on a stack and the newly rendered template, this
//! crate decides whether the deployment can be applied by calling service APIs directly
//! (a "hotswap") instead of running a full CloudFormation stack update, and if so performs
//! the minimal set of calls.
//!
//! # Architecture Overview
//!
//! - **Template model** ([`app::cfn_template`], [`app::cfn_intrinsic_functions`]): typed
//!   representation of rendered templates, with property values parsed into an
//!   [`app::cfn_intrinsic_functions::Expression`] tree.
//! - **Evaluation** ([`app::hotswap::evaluator`], [`app::hotswap::value_source`]): resolves
//!   `Ref`, `Fn::GetAtt`, `Fn::Sub`, `Fn::Join`, ... against live physical IDs, parameters
//!   and mappings of one stack level.
//! - **Diff and classification** ([`app::hotswap::diff`], [`app::hotswap::classifier`]):
//!   computes per-resource changes and decides, per resource type, whether each one is a
//!   no-op, hotswappable, or blocks the hotswap.
//! - **Nested stacks** ([`app::hotswap::nested_stacks`]): recursive expansion of
//!   `AWS::CloudFormation::Stack` resources into a [`app::hotswap::StackNode`] tree.
//! - **Orchestration** ([`app::hotswap::orchestrator`], [`app::hotswap::executors`]): the
//!   tree-wide go/no-go decision and execution of the collected operations.
//!
//! # Entry point
//!
//! [`app::hotswap::HotswapDeployer::try_hotswap`] returns a
//! [`app::hotswap::HotswapResult`]: `Applied`, `FullDeploymentRequired` (an expected
//! outcome, the caller falls back to a normal deployment) or `Error`.

#![warn(clippy::all, rust_2018_idioms)]

// Include logging macros first
#[macro_use]
pub mod logging_macros;

pub mod app;

pub use app::hotswap::{HotswapDeployer, HotswapResult};
