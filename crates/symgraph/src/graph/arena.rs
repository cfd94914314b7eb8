use std::collections::{BTreeMap, HashMap};

use smallvec::SmallVec;
use tracing::trace;

use crate::config::Config;
use crate::error::{GraphError, Result};
use crate::ops::Op;
use crate::shared::SharedVariable;
use crate::types::{DType, TensorType, Type};
use crate::value::{HostTensor, Value};

use super::apply::VarList;
use super::traversal::GraphView;
use super::{Apply, ApplyId, Owner, VarId, Variable, VariableKind};

/// Append-only arena holding every Variable and Apply of a user graph.
///
/// An Apply may only reference Variables that already exist and its outputs are
/// allocated with it, so every graph built through this API is acyclic. Type
/// inference runs eagerly: a malformed Apply is rejected before it is stored.
#[derive(Debug, Clone)]
pub struct Graph {
    config: Config,
    variables: Vec<Variable>,
    applies: Vec<Apply>,
    shared_ids: HashMap<u64, VarId>,
    default_updates: BTreeMap<VarId, VarId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Graph {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            variables: Vec::new(),
            applies: Vec::new(),
            shared_ids: HashMap::new(),
            default_updates: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Float dtype selected by `floatX`.
    pub fn float_x(&self) -> DType {
        self.config.float_x.dtype()
    }

    /// Declares a named placeholder of the given type.
    pub fn input(&mut self, name: &str, ty: impl Into<Type>) -> VarId {
        self.push_variable(Some(name.to_string()), ty.into(), None, VariableKind::Input)
    }

    pub fn scalar(&mut self, name: &str) -> VarId {
        let ty = TensorType::scalar(self.float_x());
        self.input(name, ty)
    }

    pub fn vector(&mut self, name: &str) -> VarId {
        let ty = TensorType::vector(self.float_x());
        self.input(name, ty)
    }

    pub fn matrix(&mut self, name: &str) -> VarId {
        let ty = TensorType::matrix(self.float_x());
        self.input(name, ty)
    }

    /// Embeds a constant; its type is the narrowest one describing the value.
    pub fn constant(&mut self, value: Value) -> VarId {
        let ty = value.infer_type();
        self.push_variable(None, ty, None, VariableKind::Constant(value))
    }

    /// Embeds a constant under an explicit type the value must fit.
    pub fn typed_constant(&mut self, value: Value, ty: Type) -> Result<VarId> {
        let value = ty
            .filter(value)
            .map_err(|message| GraphError::type_mismatch("constant", message))?;
        Ok(self.push_variable(None, ty, None, VariableKind::Constant(value)))
    }

    /// Rank-0 constant of the configured float dtype.
    pub fn scalar_constant(&mut self, value: f64) -> VarId {
        let dtype = self.float_x();
        let value = dtype.coerce(value).unwrap_or(value);
        self.constant(Value::Tensor(HostTensor::scalar(dtype, value)))
    }

    /// Returns the root Variable bound to `shared`, creating it on first use.
    pub fn shared(&mut self, shared: &SharedVariable) -> VarId {
        if let Some(&existing) = self.shared_ids.get(&shared.id()) {
            return existing;
        }
        let id = self.push_variable(
            shared.name().map(str::to_string),
            shared.ty().clone(),
            None,
            VariableKind::Shared(shared.clone()),
        );
        self.shared_ids.insert(shared.id(), id);
        id
    }

    /// Applies `op` to `inputs`, inferring output types and allocating outputs.
    pub fn apply(&mut self, op: Op, inputs: &[VarId]) -> Result<ApplyId> {
        let mut input_types = Vec::with_capacity(inputs.len());
        for &input in inputs {
            input_types.push(self.var(input)?.ty.clone());
        }
        let output_types = op.infer_types(&input_types)?;
        if output_types.is_empty() {
            return Err(GraphError::type_mismatch(op.to_string(), "op produces no outputs"));
        }

        let apply_id = ApplyId::from_index(self.applies.len());
        let outputs: VarList = output_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| {
                let owner = Owner {
                    apply: apply_id,
                    index,
                };
                self.push_variable(None, ty, Some(owner), VariableKind::Computed)
            })
            .collect();

        trace!(apply = %apply_id, op = %op, "apply created");
        self.applies.push(Apply {
            id: apply_id,
            op,
            inputs: SmallVec::from_slice(inputs),
            outputs,
        });
        Ok(apply_id)
    }

    /// Applies `op` and returns its first output. Every Apply has one.
    pub fn apply_one(&mut self, op: Op, inputs: &[VarId]) -> Result<VarId> {
        let apply = self.apply(op, inputs)?;
        Ok(self.applies[apply.index()].outputs[0])
    }

    /// Registers the expression a shared variable takes after every call of a
    /// function compiled from this graph, unless the caller opts out.
    pub fn set_default_update(&mut self, shared: VarId, update: VarId) -> Result<()> {
        let target = self.var(shared)?;
        if target.shared().is_none() {
            return Err(GraphError::InvalidUpdate {
                var: shared,
                message: "only shared variables can carry an update".to_string(),
            });
        }
        let target_ty = target.ty.clone();
        let update_ty = &self.var(update)?.ty;
        if *update_ty != target_ty {
            return Err(GraphError::InvalidUpdate {
                var: shared,
                message: format!("update of type {update_ty} does not match {target_ty}"),
            });
        }
        self.default_updates.insert(shared, update);
        Ok(())
    }

    pub fn default_update(&self, shared: VarId) -> Option<VarId> {
        self.default_updates.get(&shared).copied()
    }

    pub fn default_updates(&self) -> impl Iterator<Item = (VarId, VarId)> + '_ {
        self.default_updates.iter().map(|(&k, &v)| (k, v))
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn applies(&self) -> &[Apply] {
        &self.applies
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn num_applies(&self) -> usize {
        self.applies.len()
    }

    /// The Apply producing `var`, if it is not a root.
    pub fn owner_of(&self, var: VarId) -> Result<Option<&Apply>> {
        Ok(self
            .var(var)?
            .owner
            .map(|owner| &self.applies[owner.apply.index()]))
    }

    pub(crate) fn push_variable(
        &mut self,
        name: Option<String>,
        ty: Type,
        owner: Option<Owner>,
        kind: VariableKind,
    ) -> VarId {
        let id = VarId::from_index(self.variables.len());
        self.variables.push(Variable {
            id,
            name,
            ty,
            owner,
            kind,
        });
        id
    }

    pub(crate) fn register_shared(&mut self, shared: &SharedVariable, id: VarId) {
        self.shared_ids.insert(shared.id(), id);
    }
}

impl GraphView for Graph {
    fn var(&self, id: VarId) -> Result<&Variable> {
        self.variables
            .get(id.index())
            .ok_or(GraphError::UnknownVariable(id))
    }

    fn node(&self, id: ApplyId) -> &Apply {
        &self.applies[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{ElemwiseOp, Op};

    #[test]
    fn apply_outputs_point_back_at_owner() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let y = graph.scalar("y");
        let apply = graph
            .apply(Op::Elemwise(ElemwiseOp::Add), &[x, y])
            .expect("add");
        let out = graph.node(apply).outputs()[0];
        let owner = graph.var(out).expect("output").owner().expect("owner");
        assert_eq!(owner.apply, apply);
        assert_eq!(owner.index, 0);
        assert!(graph.var(x).expect("x").is_root());
    }

    #[test]
    fn dtype_mismatch_is_rejected_eagerly() {
        let mut graph = Graph::default();
        let x = graph.input("x", TensorType::scalar(DType::Float32));
        let y = graph.input("y", TensorType::scalar(DType::Float64));
        let err = graph
            .apply(Op::Elemwise(ElemwiseOp::Add), &[x, y])
            .unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
        assert_eq!(graph.num_applies(), 0);
    }

    #[test]
    fn unknown_input_is_rejected() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let err = graph
            .apply(Op::Elemwise(ElemwiseOp::Neg), &[VarId(x.0 + 10)])
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownVariable(_)));
    }

    #[derive(Debug)]
    struct Sink;

    impl crate::ops::OpImpl for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        fn infer_types(&self, _inputs: &[Type]) -> Result<Vec<Type>> {
            Ok(Vec::new())
        }

        fn perform(&self, _inputs: &[Value]) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn op_without_outputs_is_rejected() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let sink = Op::Custom(crate::ops::CustomOp::new(Sink));
        let err = graph.apply_one(sink, &[x]).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { ref op, .. } if op == "sink"));
        assert_eq!(graph.num_applies(), 0);
    }
}
