//! Error types of the hotswap engine.
//!
//! [`EvaluationError`] is recovered locally: a resource whose touched properties fail to
//! evaluate is downgraded to a non-hotswappable change. [`HotswapError`] is fatal for the
//! whole attempt and surfaces as [`super::HotswapResult::Error`].

use thiserror::Error;

/// Why an expression could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    /// `Ref`, `Fn::GetAtt` or a `Fn::Sub` token names something that is neither a
    /// parameter nor a deployed resource
    #[error("Parameter or resource '{0}' could not be found for evaluation")]
    UnresolvedReference(String),

    /// A declared parameter with no override, no default and no previous value
    #[error("Parameter '{0}' is declared but has no value: pass it as a parameter override or give it a Default")]
    ParameterWithoutValue(String),

    /// `Fn::GetAtt` on an attribute the engine cannot derive for that resource type
    #[error("Attribute '{attribute}' of resource type '{resource_type}' is not supported for hotswap evaluation")]
    UnsupportedAttribute {
        resource_type: String,
        attribute: String,
    },

    /// An intrinsic the evaluator does not compute
    #[error("Intrinsic function '{0}' is not supported for hotswap evaluation")]
    UnsupportedIntrinsic(String),

    /// `Fn::ImportValue` of an export that does not exist
    #[error("Export '{0}' could not be found for evaluation")]
    ExportNotFound(String),

    /// Mapping lookup with an unknown map or key
    #[error("Mapping lookup {0} could not be found for evaluation")]
    MappingNotFound(String),

    /// Arguments of the wrong type or shape
    #[error("{0}")]
    Malformed(String),
}

impl EvaluationError {
    /// Errors that mean the template cannot be evaluated at all, regardless of which
    /// resource touched the expression
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvaluationError::ParameterWithoutValue(_))
    }
}

/// Fatal failure of a hotswap attempt. Nothing has been applied when one is returned.
#[derive(Debug, Error)]
pub enum HotswapError {
    #[error("Stack '{0}' not found")]
    StackNotFound(String),

    #[error("Template for nested stack '{logical_id}' in stack '{stack_name}' was not provided")]
    MissingNestedTemplate {
        stack_name: String,
        logical_id: String,
    },

    #[error("Could not evaluate parameter '{parameter}' of nested stack '{logical_id}' in stack '{stack_name}': {source}")]
    UnresolvableNestedParameter {
        stack_name: String,
        logical_id: String,
        parameter: String,
        #[source]
        source: EvaluationError,
    },

    #[error("Could not evaluate resource '{logical_id}' in stack '{stack_name}': {source}")]
    UnresolvableParameter {
        stack_name: String,
        logical_id: String,
        #[source]
        source: EvaluationError,
    },

    #[error("Malformed template for stack '{stack_name}': {reason}")]
    MalformedTemplate { stack_name: String, reason: String },

    #[error("Hotswap configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}
