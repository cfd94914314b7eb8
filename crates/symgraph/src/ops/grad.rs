use crate::error::{GraphError, Result};
use crate::graph::{Graph, GraphView, VarId};

use super::functional as F;
use super::{ElemwiseOp, Op, Transfer};

/// Gradient contribution of one Apply output set to one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputGrad {
    /// Gradient expression, possibly still shaped like the broadcast output.
    Grad(VarId),
    /// The input does not influence the outputs differentiably (for example a
    /// shape donor).
    Zero,
    /// No gradient rule exists for this input.
    Undefined,
}

impl Op {
    /// Builds gradient expressions for the inputs of one Apply.
    ///
    /// `output_grads[i]` is the accumulated gradient of output `i`, `None` when
    /// that output does not reach the cost. Inputs with `wanted[i] == false`
    /// get [`InputGrad::Zero`] and no expression is added to `graph`.
    pub(crate) fn grad(
        &self,
        graph: &mut Graph,
        inputs: &[VarId],
        outputs: &[VarId],
        output_grads: &[Option<VarId>],
        wanted: &[bool],
    ) -> Result<Vec<InputGrad>> {
        use InputGrad::{Grad, Undefined, Zero};

        let gz = || first_grad(self, output_grads);
        let want = |position: usize| wanted.get(position).copied().unwrap_or(true);
        let grads = match self {
            Op::Elemwise(op) => {
                let gz = gz()?;
                let z = outputs[0];
                match op {
                    ElemwiseOp::Add => vec![Grad(gz), Grad(gz)],
                    ElemwiseOp::Sub => {
                        let gy = if want(1) { Grad(F::neg(graph, gz)?) } else { Zero };
                        vec![Grad(gz), gy]
                    }
                    ElemwiseOp::Mul => {
                        let (x, y) = (inputs[0], inputs[1]);
                        let gx = if want(0) { Grad(F::mul(graph, gz, y)?) } else { Zero };
                        let gy = if want(1) { Grad(F::mul(graph, gz, x)?) } else { Zero };
                        vec![gx, gy]
                    }
                    ElemwiseOp::Div => {
                        let y = inputs[1];
                        let gx = if want(0) { Grad(F::div(graph, gz, y)?) } else { Zero };
                        let gy = if want(1) {
                            let gz_z = F::mul(graph, gz, z)?;
                            let ratio = F::div(graph, gz_z, y)?;
                            Grad(F::neg(graph, ratio)?)
                        } else {
                            Zero
                        };
                        vec![gx, gy]
                    }
                    ElemwiseOp::Pow => {
                        let (x, y) = (inputs[0], inputs[1]);
                        // d/dx = y * x^(y-1), d/dy = z * log(x)
                        let gx = if want(0) {
                            let one = F::ones_like(graph, y)?;
                            let y_minus_one = F::sub(graph, y, one)?;
                            let x_pow = F::pow(graph, x, y_minus_one)?;
                            let dx = F::mul(graph, y, x_pow)?;
                            Grad(F::mul(graph, gz, dx)?)
                        } else {
                            Zero
                        };
                        let gy = if want(1) {
                            let log_x = F::log(graph, x)?;
                            let dy = F::mul(graph, z, log_x)?;
                            Grad(F::mul(graph, gz, dy)?)
                        } else {
                            Zero
                        };
                        vec![gx, gy]
                    }
                    ElemwiseOp::Neg => vec![Grad(F::neg(graph, gz)?)],
                    ElemwiseOp::Exp => vec![Grad(F::mul(graph, gz, z)?)],
                    ElemwiseOp::Log => vec![Grad(F::div(graph, gz, inputs[0])?)],
                    ElemwiseOp::Tanh => {
                        let one = F::ones_like(graph, z)?;
                        let z_sq = F::mul(graph, z, z)?;
                        let slope = F::sub(graph, one, z_sq)?;
                        vec![Grad(F::mul(graph, gz, slope)?)]
                    }
                    ElemwiseOp::Round => vec![Undefined],
                }
            }
            Op::Sum { axes, keepdims } => {
                let mut g = gz()?;
                if !keepdims {
                    g = F::expand_dims(graph, g, axes)?;
                }
                vec![Grad(F::broadcast_like(graph, g, inputs[0])?)]
            }
            Op::ExpandDims { axes } => vec![Grad(F::sum(graph, gz()?, axes, false)?)],
            Op::BroadcastLike => vec![Grad(gz()?), Zero],
            Op::Fill { .. } => vec![Zero],
            Op::Dot => {
                let gz = gz()?;
                let (a, b) = (inputs[0], inputs[1]);
                let ga = if want(0) {
                    let b_t = F::transpose(graph, b)?;
                    Grad(F::dot(graph, gz, b_t)?)
                } else {
                    Zero
                };
                let gb = if want(1) {
                    let a_t = F::transpose(graph, a)?;
                    Grad(F::dot(graph, a_t, gz)?)
                } else {
                    Zero
                };
                vec![ga, gb]
            }
            Op::Transpose => vec![Grad(F::transpose(graph, gz()?)?)],
            Op::Transfer(Transfer::ToDevice(_)) => vec![Grad(F::to_host(graph, gz()?)?)],
            Op::Transfer(Transfer::ToHost) => {
                let gz = gz()?;
                let location = F::tensor_location(graph, inputs[0])?;
                vec![Grad(F::relocate(graph, gz, location)?)]
            }
            Op::Random(_) | Op::OnDevice { .. } => vec![Undefined; inputs.len()],
            Op::Custom(custom) => {
                match custom
                    .implementation()
                    .grad(graph, inputs, outputs, output_grads)?
                {
                    Some(grads) => grads,
                    None => vec![Undefined; inputs.len()],
                }
            }
        };

        if grads.len() != inputs.len() {
            return Err(GraphError::execution(
                self.to_string(),
                format!(
                    "gradient rule returned {} entries for {} inputs",
                    grads.len(),
                    inputs.len()
                ),
            ));
        }
        Ok(grads)
    }
}

fn first_grad(op: &Op, output_grads: &[Option<VarId>]) -> Result<VarId> {
    output_grads.first().copied().flatten().ok_or_else(|| {
        GraphError::execution(op.to_string(), "gradient requested without an output gradient")
    })
}

/// Contracts a gradient back to the type of `target`: sums the leading axes the
/// target lacks, then (keeping dims) the axes the target declares broadcastable,
/// and moves it to the target's location.
pub(crate) fn reduce_to(graph: &mut Graph, grad: VarId, target: VarId) -> Result<VarId> {
    let target_ty = graph
        .ty(target)?
        .tensor()
        .cloned()
        .ok_or_else(|| GraphError::type_mismatch("grad", format!("{target} is not a tensor")))?;
    let grad_ty = graph
        .ty(grad)?
        .tensor()
        .cloned()
        .ok_or_else(|| GraphError::type_mismatch("grad", format!("{grad} is not a tensor")))?;

    let mut g = grad;
    let mut rank = grad_ty.rank();
    let mut broadcastable = grad_ty.broadcastable.clone();
    if rank > target_ty.rank() {
        let leading: Vec<usize> = (0..rank - target_ty.rank()).collect();
        g = F::sum(graph, g, &leading, false)?;
        broadcastable.drain(..leading.len());
        rank = target_ty.rank();
    }

    let collapse: Vec<usize> = if rank == target_ty.rank() {
        (0..rank)
            .filter(|&axis| target_ty.broadcastable[axis] && !broadcastable[axis])
            .collect()
    } else {
        Vec::new()
    };
    if !collapse.is_empty() {
        g = F::sum(graph, g, &collapse, true)?;
    }

    let location = F::tensor_location(graph, g)?;
    if location != target_ty.location {
        g = F::relocate(graph, g, target_ty.location)?;
    }

    let reduced = graph.ty(g)?.tensor().map(|tt| tt.broadcastable.clone());
    if reduced.as_ref() != Some(&target_ty.broadcastable) {
        g = F::broadcast_like(graph, g, target)?;
    }
    Ok(g)
}
