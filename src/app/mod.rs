//! Core modules of the hotswap engine.
//!
//! # Module Organization
//!
//! ## Template model
//! - [`cfn_template`] - Rendered CloudFormation templates (resources, parameters, mappings)
//! - [`cfn_intrinsic_functions`] - Intrinsic function expression trees
//!
//! ## Hotswap engine
//! - [`hotswap`] - Diffing, classification, nested stack resolution, orchestration and
//!   execution of hotswap operations

pub mod cfn_intrinsic_functions;
pub mod cfn_template;
pub mod hotswap;
