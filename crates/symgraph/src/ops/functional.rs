//! Expression builders. Every helper appends one Apply (plus any constants it
//! needs) and returns the resulting Variable.

use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphView, VarId};
use crate::types::Location;

use super::{Distribution, ElemwiseOp, Op, RandomSpec, Transfer};

fn elemwise(graph: &mut Graph, op: ElemwiseOp, inputs: &[VarId]) -> Result<VarId> {
    graph.apply_one(Op::Elemwise(op), inputs)
}

pub fn add(graph: &mut Graph, x: VarId, y: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Add, &[x, y])
}

pub fn sub(graph: &mut Graph, x: VarId, y: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Sub, &[x, y])
}

pub fn mul(graph: &mut Graph, x: VarId, y: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Mul, &[x, y])
}

pub fn div(graph: &mut Graph, x: VarId, y: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Div, &[x, y])
}

pub fn pow(graph: &mut Graph, x: VarId, y: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Pow, &[x, y])
}

pub fn neg(graph: &mut Graph, x: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Neg, &[x])
}

pub fn exp(graph: &mut Graph, x: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Exp, &[x])
}

pub fn log(graph: &mut Graph, x: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Log, &[x])
}

pub fn tanh(graph: &mut Graph, x: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Tanh, &[x])
}

pub fn round(graph: &mut Graph, x: VarId) -> Result<VarId> {
    elemwise(graph, ElemwiseOp::Round, &[x])
}

/// `x * c` for a float constant matching `x`'s dtype.
pub fn scale(graph: &mut Graph, x: VarId, factor: f64) -> Result<VarId> {
    let c = fill(graph, x, factor)?;
    mul(graph, x, c)
}

pub fn sum(graph: &mut Graph, x: VarId, axes: &[usize], keepdims: bool) -> Result<VarId> {
    graph.apply_one(
        Op::Sum {
            axes: axes.to_vec(),
            keepdims,
        },
        &[x],
    )
}

/// Sum over every axis, yielding a rank-0 tensor.
pub fn sum_all(graph: &mut Graph, x: VarId) -> Result<VarId> {
    let rank = tensor_rank(graph, x)?;
    let axes: Vec<usize> = (0..rank).collect();
    sum(graph, x, &axes, false)
}

pub fn mean_all(graph: &mut Graph, x: VarId) -> Result<VarId> {
    let total = sum_all(graph, x)?;
    let count = graph.apply_one(Op::Fill { value: 1.0 }, &[x])?;
    let count = sum_all(graph, count)?;
    div(graph, total, count)
}

pub fn expand_dims(graph: &mut Graph, x: VarId, axes: &[usize]) -> Result<VarId> {
    if axes.is_empty() {
        return Ok(x);
    }
    graph.apply_one(
        Op::ExpandDims {
            axes: axes.to_vec(),
        },
        &[x],
    )
}

pub fn broadcast_like(graph: &mut Graph, value: VarId, target: VarId) -> Result<VarId> {
    graph.apply_one(Op::BroadcastLike, &[value, target])
}

pub fn fill(graph: &mut Graph, like: VarId, value: f64) -> Result<VarId> {
    graph.apply_one(Op::Fill { value }, &[like])
}

pub fn ones_like(graph: &mut Graph, like: VarId) -> Result<VarId> {
    fill(graph, like, 1.0)
}

pub fn zeros_like(graph: &mut Graph, like: VarId) -> Result<VarId> {
    fill(graph, like, 0.0)
}

pub fn dot(graph: &mut Graph, a: VarId, b: VarId) -> Result<VarId> {
    graph.apply_one(Op::Dot, &[a, b])
}

pub fn transpose(graph: &mut Graph, x: VarId) -> Result<VarId> {
    graph.apply_one(Op::Transpose, &[x])
}

pub fn to_device(graph: &mut Graph, x: VarId, device: u32) -> Result<VarId> {
    graph.apply_one(Op::Transfer(Transfer::ToDevice(device)), &[x])
}

pub fn to_host(graph: &mut Graph, x: VarId) -> Result<VarId> {
    graph.apply_one(Op::Transfer(Transfer::ToHost), &[x])
}

/// Moves `x` to `location`, inserting a transfer only when needed.
pub fn relocate(graph: &mut Graph, x: VarId, location: Location) -> Result<VarId> {
    let current = tensor_location(graph, x)?;
    match (current, location) {
        (from, to) if from == to => Ok(x),
        (Location::Host, Location::Device(n)) => to_device(graph, x, n),
        (Location::Device(_), Location::Host) => to_host(graph, x),
        (Location::Device(_), Location::Device(n)) => {
            let host = to_host(graph, x)?;
            to_device(graph, host, n)
        }
        (Location::Host, Location::Host) => Ok(x),
    }
}

/// Draws from `distribution` using generator state `rng`; returns
/// `(next_state, sample)`.
pub fn random(
    graph: &mut Graph,
    rng: VarId,
    distribution: Distribution,
    shape: &[usize],
) -> Result<(VarId, VarId)> {
    let spec = RandomSpec {
        distribution,
        shape: shape.to_vec(),
        dtype: graph.float_x(),
    };
    let apply = graph.apply(Op::Random(spec), &[rng])?;
    let outputs = graph.node(apply).outputs();
    Ok((outputs[0], outputs[1]))
}

pub(crate) fn tensor_rank(graph: &Graph, x: VarId) -> Result<usize> {
    let ty = graph.ty(x)?;
    ty.tensor()
        .map(|tt| tt.rank())
        .ok_or_else(|| GraphError::type_mismatch("rank", format!("{x} has non-tensor type {ty}")))
}

pub(crate) fn tensor_location(graph: &Graph, x: VarId) -> Result<Location> {
    let ty = graph.ty(x)?;
    ty.tensor()
        .map(|tt| tt.location)
        .ok_or_else(|| GraphError::type_mismatch("location", format!("{x} has non-tensor type {ty}")))
}
