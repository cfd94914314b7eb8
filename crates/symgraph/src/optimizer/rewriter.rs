use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph, Graph, GraphView, VarId};
use crate::ops::Op;
use crate::types::Type;
use crate::value::Value;

/// Rewrite-time view of a [`FunctionGraph`].
///
/// Queries see the graph through its forwarding table. Rules only append nodes
/// through `emit*`; replacing uses is reserved for the driver, which type-checks
/// every proposed replacement first.
pub struct GraphRewriter<'a> {
    fgraph: &'a mut FunctionGraph,
}

impl<'a> GraphRewriter<'a> {
    pub fn new(fgraph: &'a mut FunctionGraph) -> Self {
        Self { fgraph }
    }

    pub fn fgraph(&self) -> &FunctionGraph {
        &*self.fgraph
    }

    pub fn op(&self, apply: ApplyId) -> &Op {
        self.fgraph.node(apply).op()
    }

    /// Inputs of `apply` after forwarding.
    pub fn inputs(&self, apply: ApplyId) -> SmallVec<[VarId; 4]> {
        self.fgraph.resolved_inputs(apply)
    }

    pub fn outputs(&self, apply: ApplyId) -> &[VarId] {
        self.fgraph.node(apply).outputs()
    }

    pub fn output(&self, apply: ApplyId) -> VarId {
        self.fgraph.node(apply).outputs()[0]
    }

    pub fn resolve(&self, var: VarId) -> VarId {
        self.fgraph.resolve(var)
    }

    pub fn type_of(&self, var: VarId) -> Option<&Type> {
        self.fgraph.ty(self.fgraph.resolve(var)).ok()
    }

    /// Apply producing the (resolved) variable, if any.
    pub fn producer(&self, var: VarId) -> Option<ApplyId> {
        let resolved = self.fgraph.resolve(var);
        self.fgraph.var(resolved).ok()?.owner().map(|owner| owner.apply)
    }

    pub fn producer_op(&self, var: VarId) -> Option<&Op> {
        self.producer(var).map(|apply| self.op(apply))
    }

    pub fn constant_value(&self, var: VarId) -> Option<&Value> {
        let resolved = self.fgraph.resolve(var);
        self.fgraph.var(resolved).ok()?.constant_value()
    }

    /// The value every element of `var` is statically known to hold: a constant
    /// whose elements are all equal, or the output of a `fill`.
    pub fn uniform_value(&self, var: VarId) -> Option<f64> {
        if let Some(value) = self.constant_value(var) {
            let data = value.as_tensor()?.data();
            let first = *data.first()?;
            return data.iter().all(|&x| x == first).then_some(first);
        }
        match self.producer_op(var)? {
            Op::Fill { value } => Some(*value),
            _ => None,
        }
    }

    pub fn emit(&mut self, op: Op, inputs: &[VarId]) -> Result<VarId> {
        self.fgraph.apply_one(op, inputs)
    }

    pub fn emit_apply(&mut self, op: Op, inputs: &[VarId]) -> Result<ApplyId> {
        self.fgraph.apply(op, inputs)
    }

    pub fn emit_constant(&mut self, value: Value, ty: Type) -> Result<VarId> {
        self.fgraph.graph_mut().typed_constant(value, ty)
    }

    /// Direct access for the expression builders in [`crate::ops::functional`].
    /// Inputs passed to them must already be resolved.
    pub fn graph_mut(&mut self) -> &mut Graph {
        self.fgraph.graph_mut()
    }
}
