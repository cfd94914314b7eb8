//! Reverse-mode symbolic differentiation.
//!
//! Gradients are new Variables appended to the same graph: the forward nodes are
//! only read. The walk covers just the Applies lying between the cost and the
//! requested variables, visited in reverse topological order, and every
//! variable's gradient is the sum of the contributions of all its consumers.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::graph::{ancestors_between, Graph, GraphView, VarId};
use crate::ops::{functional as F, InputGrad};

/// What to do with a requested variable that has no path to the cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disconnected {
    #[default]
    Raise,
    /// Return `zeros_like(wrt)`.
    Zero,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GradOptions {
    pub disconnected: Disconnected,
}

/// Accumulated gradients keyed by forward variable.
#[derive(Debug, Default)]
struct GradStore {
    grads: HashMap<VarId, VarId>,
}

impl GradStore {
    fn get(&self, var: VarId) -> Option<VarId> {
        self.grads.get(&var).copied()
    }

    /// Adds `grad` to whatever has already been accumulated for `var`.
    fn accumulate(&mut self, graph: &mut Graph, var: VarId, grad: VarId) -> Result<()> {
        let total = match self.grads.get(&var) {
            Some(&existing) => F::add(graph, existing, grad)?,
            None => grad,
        };
        self.grads.insert(var, total);
        Ok(())
    }
}

/// Gradient of the scalar `cost` with respect to each of `wrt`.
pub fn grad(graph: &mut Graph, cost: VarId, wrt: &[VarId]) -> Result<Vec<VarId>> {
    grad_with(graph, cost, wrt, GradOptions::default())
}

pub fn grad_with(
    graph: &mut Graph,
    cost: VarId,
    wrt: &[VarId],
    options: GradOptions,
) -> Result<Vec<VarId>> {
    let cost_ty = graph.ty(cost)?.clone();
    match cost_ty.tensor() {
        Some(tt) if tt.is_scalar() && tt.dtype.is_float() => {}
        _ => return Err(GraphError::NonScalarCost { ty: cost_ty }),
    }
    for &var in wrt {
        graph.var(var)?;
    }

    let order = ancestors_between(graph, &[cost], wrt)?;
    debug!(cost = %cost, wrt = wrt.len(), applies = order.len(), "building gradient");

    // Variables through which a wrt can influence the cost.
    let mut on_path: HashSet<VarId> = wrt.iter().copied().collect();
    for &apply in &order {
        on_path.extend(graph.node(apply).outputs().iter().copied());
    }

    let mut store = GradStore::default();
    let seed = F::ones_like(graph, cost)?;
    store.accumulate(graph, cost, seed)?;

    for &apply in order.iter().rev() {
        let node = graph.node(apply);
        let op = node.op().clone();
        let inputs = node.inputs().to_vec();
        let outputs = node.outputs().to_vec();

        let output_grads: Vec<Option<VarId>> =
            outputs.iter().map(|&out| store.get(out)).collect();
        if output_grads.iter().all(Option::is_none) {
            continue;
        }

        let wanted: Vec<bool> = inputs.iter().map(|input| on_path.contains(input)).collect();
        let input_grads = op.grad(graph, &inputs, &outputs, &output_grads, &wanted)?;
        for (position, (&input, input_grad)) in inputs.iter().zip(input_grads).enumerate() {
            if !on_path.contains(&input) {
                continue;
            }
            match input_grad {
                InputGrad::Grad(g) => {
                    let g = crate::ops::reduce_to(graph, g, input)?;
                    store.accumulate(graph, input, g)?;
                }
                InputGrad::Zero => {}
                InputGrad::Undefined => {
                    return Err(GraphError::GradientUndefined {
                        op: op.to_string(),
                        apply,
                        input: position,
                    });
                }
            }
        }
    }

    let mut result = Vec::with_capacity(wrt.len());
    for &var in wrt {
        let g = match store.get(var) {
            Some(g) => g,
            None if on_path_to_cost(graph, &order, var) => F::zeros_like(graph, var)?,
            None => match options.disconnected {
                Disconnected::Raise => return Err(GraphError::DisconnectedInput { var }),
                Disconnected::Zero => F::zeros_like(graph, var)?,
            },
        };
        result.push(g);
    }
    Ok(result)
}

/// Whether `var` structurally feeds the cost (its gradient may still be zero).
fn on_path_to_cost(graph: &Graph, order: &[crate::graph::ApplyId], var: VarId) -> bool {
    order
        .iter()
        .any(|&apply| graph.node(apply).inputs().contains(&var))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DType, TensorType};

    #[test]
    fn vector_cost_is_rejected() {
        let mut graph = Graph::default();
        let v = graph.vector("v");
        let err = grad(&mut graph, v, &[v]).unwrap_err();
        assert!(matches!(err, GraphError::NonScalarCost { .. }));
    }

    #[test]
    fn gradient_types_match_wrt() {
        let mut graph = Graph::default();
        let row = graph.input(
            "row",
            TensorType::new(DType::Float64, vec![true, false]),
        );
        let m = graph.matrix("m");
        let prod = F::mul(&mut graph, row, m).unwrap();
        let cost = F::sum_all(&mut graph, prod).unwrap();
        let grads = grad(&mut graph, cost, &[row, m]).unwrap();
        assert_eq!(graph.ty(grads[0]).unwrap(), graph.ty(row).unwrap());
        assert_eq!(graph.ty(grads[1]).unwrap(), graph.ty(m).unwrap());
    }

    #[test]
    fn off_path_inputs_get_no_gradient_expression() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let y = graph.scalar("y");
        let cost = F::pow(&mut graph, x, y).unwrap();
        let before = graph.num_applies();

        grad(&mut graph, cost, &[x]).unwrap();
        let built: Vec<String> = graph.applies()[before..]
            .iter()
            .map(|apply| apply.op().to_string())
            .collect();
        assert!(!built.iter().any(|op| op == "log"), "built {built:?}");
    }

    #[test]
    fn gradient_of_cost_wrt_itself_is_one() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let grads = grad(&mut graph, x, &[x]).unwrap();
        let node = graph.owner_of(grads[0]).unwrap().unwrap();
        assert!(matches!(node.op(), crate::ops::Op::Fill { value } if *value == 1.0));
    }
}
