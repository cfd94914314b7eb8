//! The closed set of operations a graph can apply, plus the extension point for
//! user-defined ones.
//!
//! Each [`Op`] declares three rules: output-type inference (`infer.rs`), host
//! evaluation (`perform.rs`), and an optional gradient (`grad.rs`). Builders for
//! the common cases live in [`functional`].

mod custom;
pub mod functional;
mod grad;
mod infer;
mod perform;

use std::fmt;

use serde::Serialize;

use crate::types::DType;

pub use custom::{CustomOp, OpImpl};
pub use grad::InputGrad;
pub(crate) use grad::reduce_to;
pub use perform::broadcast_shapes;

/// Elementwise arithmetic with numpy-style broadcasting of binary operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElemwiseOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Exp,
    Log,
    Tanh,
    Round,
}

impl ElemwiseOp {
    pub fn arity(self) -> usize {
        match self {
            ElemwiseOp::Add
            | ElemwiseOp::Sub
            | ElemwiseOp::Mul
            | ElemwiseOp::Div
            | ElemwiseOp::Pow => 2,
            ElemwiseOp::Neg
            | ElemwiseOp::Exp
            | ElemwiseOp::Log
            | ElemwiseOp::Tanh
            | ElemwiseOp::Round => 1,
        }
    }

    /// Ops only defined over float dtypes.
    pub fn requires_float(self) -> bool {
        matches!(
            self,
            ElemwiseOp::Div
                | ElemwiseOp::Pow
                | ElemwiseOp::Exp
                | ElemwiseOp::Log
                | ElemwiseOp::Tanh
                | ElemwiseOp::Round
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ElemwiseOp::Add => "add",
            ElemwiseOp::Sub => "sub",
            ElemwiseOp::Mul => "mul",
            ElemwiseOp::Div => "div",
            ElemwiseOp::Pow => "pow",
            ElemwiseOp::Neg => "neg",
            ElemwiseOp::Exp => "exp",
            ElemwiseOp::Log => "log",
            ElemwiseOp::Tanh => "tanh",
            ElemwiseOp::Round => "round",
        }
    }

    pub(crate) fn eval_unary(self, x: f64) -> f64 {
        match self {
            ElemwiseOp::Neg => -x,
            ElemwiseOp::Exp => x.exp(),
            ElemwiseOp::Log => x.ln(),
            ElemwiseOp::Tanh => x.tanh(),
            // half away from zero
            ElemwiseOp::Round => x.round(),
            _ => f64::NAN,
        }
    }

    pub(crate) fn eval_binary(self, x: f64, y: f64) -> f64 {
        match self {
            ElemwiseOp::Add => x + y,
            ElemwiseOp::Sub => x - y,
            ElemwiseOp::Mul => x * y,
            ElemwiseOp::Div => x / y,
            ElemwiseOp::Pow => x.powf(y),
            _ => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Distribution {
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std: f64 },
}

/// A draw from a random stream: consumes a generator state, yields the next
/// state and a tensor of samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RandomSpec {
    pub distribution: Distribution,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Transfer {
    /// Host to the accelerator with the given ordinal.
    ToDevice(u32),
    ToHost,
}

/// Stateless description of a computation. Reused across many Applies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Op {
    Elemwise(ElemwiseOp),
    /// Sum over `axes`, keeping them as length-one axes when `keepdims`.
    Sum { axes: Vec<usize>, keepdims: bool },
    /// Inserts broadcastable axes at the given output positions.
    ExpandDims { axes: Vec<usize> },
    /// Broadcasts the first input to the shape of the second.
    BroadcastLike,
    /// Tensor shaped like the input with every element set to `value`.
    Fill { value: f64 },
    /// Matrix product of two rank-2 tensors.
    Dot,
    /// Reverses the axis order.
    Transpose,
    Random(RandomSpec),
    Transfer(Transfer),
    /// Device-specialized form of `op`; every tensor operand lives on `device`.
    OnDevice { device: u32, op: Box<Op> },
    Custom(CustomOp),
}

impl Op {
    pub fn add() -> Self {
        Op::Elemwise(ElemwiseOp::Add)
    }

    pub fn sub() -> Self {
        Op::Elemwise(ElemwiseOp::Sub)
    }

    pub fn mul() -> Self {
        Op::Elemwise(ElemwiseOp::Mul)
    }

    pub fn div() -> Self {
        Op::Elemwise(ElemwiseOp::Div)
    }

    /// Kernel-family name used for registry lookups (`add`, `sum`, `random_normal`, ...).
    pub fn kind(&self) -> String {
        match self {
            Op::Elemwise(op) => op.name().to_string(),
            Op::Sum { .. } => "sum".to_string(),
            Op::ExpandDims { .. } => "expand_dims".to_string(),
            Op::BroadcastLike => "broadcast_like".to_string(),
            Op::Fill { .. } => "fill".to_string(),
            Op::Dot => "dot".to_string(),
            Op::Transpose => "transpose".to_string(),
            Op::Random(spec) => match spec.distribution {
                Distribution::Uniform { .. } => "random_uniform".to_string(),
                Distribution::Normal { .. } => "random_normal".to_string(),
            },
            Op::Transfer(Transfer::ToDevice(_)) => "to_device".to_string(),
            Op::Transfer(Transfer::ToHost) => "to_host".to_string(),
            Op::OnDevice { op, .. } => op.kind(),
            Op::Custom(custom) => custom.name().to_string(),
        }
    }

    /// Ops whose Applies must never be merged, folded, or reordered freely.
    pub fn is_side_effecting(&self) -> bool {
        match self {
            Op::Random(_) => true,
            Op::OnDevice { op, .. } => op.is_side_effecting(),
            Op::Custom(custom) => !custom.is_pure(),
            _ => false,
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Op::Transfer(_))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Elemwise(op) => f.write_str(op.name()),
            Op::Sum { axes, keepdims } => write!(f, "sum{{axes={axes:?}, keepdims={keepdims}}}"),
            Op::ExpandDims { axes } => write!(f, "expand_dims{{axes={axes:?}}}"),
            Op::BroadcastLike => f.write_str("broadcast_like"),
            Op::Fill { value } => write!(f, "fill{{{value}}}"),
            Op::Dot => f.write_str("dot"),
            Op::Transpose => f.write_str("transpose"),
            Op::Random(spec) => match spec.distribution {
                Distribution::Uniform { low, high } => {
                    write!(f, "random_uniform{{{low}, {high}, {:?}}}", spec.shape)
                }
                Distribution::Normal { mean, std } => {
                    write!(f, "random_normal{{{mean}, {std}, {:?}}}", spec.shape)
                }
            },
            Op::Transfer(Transfer::ToDevice(n)) => write!(f, "to_device<gpu{n}>"),
            Op::Transfer(Transfer::ToHost) => f.write_str("to_host"),
            Op::OnDevice { device, op } => write!(f, "gpu{device}.{op}"),
            Op::Custom(custom) => f.write_str(custom.name()),
        }
    }
}
