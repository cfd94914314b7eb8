use thiserror::Error;

use crate::graph::{ApplyId, VarId};
use crate::types::Type;

/// Errors raised while building, differentiating, compiling, or running graphs.
///
/// Every structural error is detected eagerly at construction time, so a graph that
/// was built without error is well-typed and acyclic before any later stage runs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// An Apply was constructed whose inputs violate the Op's constraints.
    #[error("type mismatch in `{op}`: {message}")]
    TypeMismatch { op: String, message: String },

    /// Traversal found an owner chain that loops back on itself.
    #[error("cycle detected through variable {var}")]
    Cycle { var: VarId },

    /// Differentiation reached an Op without a gradient rule on a required path.
    #[error("gradient of `{op}` (apply {apply}) is undefined with respect to input {input}")]
    GradientUndefined {
        op: String,
        apply: ApplyId,
        input: usize,
    },

    /// A requested wrt variable has no path to the cost.
    #[error("variable {var} is not connected to the cost")]
    DisconnectedInput { var: VarId },

    #[error("cost must be a scalar float tensor, got {ty}")]
    NonScalarCost { ty: Type },

    #[error("variable {0} does not belong to this graph")]
    UnknownVariable(VarId),

    /// A root input is reachable from the outputs but was not declared.
    #[error("input variable {var} ({name}) is needed but was not provided")]
    MissingInput { var: VarId, name: String },

    #[error("invalid input {name}: {message}")]
    InvalidInput { name: String, message: String },

    #[error("invalid update for {var}: {message}")]
    InvalidUpdate { var: VarId, message: String },

    #[error("execution of `{op}` failed: {message}")]
    Execution { op: String, message: String },
}

impl GraphError {
    pub fn type_mismatch(op: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::TypeMismatch {
            op: op.into(),
            message: message.into(),
        }
    }

    pub fn execution(op: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::Execution {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Configuration parsing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown device `{0}` (expected `cpu` or `gpuN`)")]
    UnknownDevice(String),
    #[error("unknown floatX `{0}` (expected `float32` or `float64`)")]
    UnknownFloatX(String),
    #[error("unknown optimizer mode `{0}` (expected `fast_run`, `fast_compile` or `none`)")]
    UnknownOptimizer(String),
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}
