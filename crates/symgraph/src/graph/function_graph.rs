use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::ops::Op;
use crate::value::Value;

use super::traversal::{self, Clients, GraphView};
use super::{Apply, ApplyId, Graph, VarId, Variable, VariableKind};

/// The optimizer's working copy of a graph region.
///
/// Nodes are never edited. A rewrite appends replacement nodes to the owned arena
/// and records `old -> new` in a forwarding table, which republishes every
/// consumer reference (and every declared output) to the replacement.
/// [`FunctionGraph::compact`] rebuilds the arena with only the live nodes.
#[derive(Debug, Clone)]
pub struct FunctionGraph {
    graph: Graph,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    forward: HashMap<VarId, VarId>,
}

impl FunctionGraph {
    /// Copies `graph` and checks that every root needed by `outputs` is either a
    /// declared input, a constant, or a shared variable.
    pub fn new(graph: &Graph, inputs: &[VarId], outputs: &[VarId]) -> Result<Self> {
        let mut declared = HashSet::new();
        for &input in inputs {
            let var = graph.var(input)?;
            if !var.is_root() {
                return Err(GraphError::InvalidInput {
                    name: var.label(),
                    message: "function inputs must be root variables".to_string(),
                });
            }
            if !declared.insert(input) {
                return Err(GraphError::InvalidInput {
                    name: var.label(),
                    message: "declared more than once".to_string(),
                });
            }
        }
        for &output in outputs {
            graph.var(output)?;
        }

        for root in traversal::root_variables(graph, outputs)? {
            let var = graph.var(root)?;
            if matches!(var.kind(), VariableKind::Input) && !declared.contains(&root) {
                return Err(GraphError::MissingInput {
                    var: root,
                    name: var.label(),
                });
            }
        }

        Ok(Self {
            graph: graph.clone(),
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            forward: HashMap::new(),
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    /// Declared outputs after forwarding.
    pub fn outputs(&self) -> Vec<VarId> {
        self.outputs.iter().map(|&out| self.resolve(out)).collect()
    }

    /// Whether any replacement is pending compaction.
    pub fn has_forwarding(&self) -> bool {
        !self.forward.is_empty()
    }

    /// Redirects every consumer of `old` to `new`.
    ///
    /// Both sides are resolved first, so the forwarding table never contains a
    /// loop. Returns `false` when they already coincide.
    pub fn replace(&mut self, old: VarId, new: VarId) -> Result<bool> {
        let old = self.resolve(old);
        let new = self.resolve(new);
        if old == new {
            return Ok(false);
        }
        let old_ty = self.graph.var(old)?.ty();
        let new_ty = self.graph.var(new)?.ty();
        if old_ty != new_ty {
            return Err(GraphError::type_mismatch(
                "replace",
                format!("cannot replace {old} of type {old_ty} with {new} of type {new_ty}"),
            ));
        }
        self.forward.insert(old, new);
        Ok(true)
    }

    /// Appends an Apply whose inputs are first resolved through forwarding.
    pub fn apply(&mut self, op: Op, inputs: &[VarId]) -> Result<ApplyId> {
        let resolved: Vec<VarId> = inputs.iter().map(|&input| self.resolve(input)).collect();
        self.graph.apply(op, &resolved)
    }

    pub fn apply_one(&mut self, op: Op, inputs: &[VarId]) -> Result<VarId> {
        let apply = self.apply(op, inputs)?;
        Ok(self.graph.node(apply).outputs()[0])
    }

    pub fn constant(&mut self, value: Value) -> VarId {
        self.graph.constant(value)
    }

    /// Live Applies in topological order.
    pub fn toposort(&self) -> Result<Vec<ApplyId>> {
        traversal::toposort(self, &self.outputs)
    }

    pub fn clients(&self) -> Result<Clients> {
        let order = self.toposort()?;
        Ok(traversal::clients(self, &order))
    }

    pub fn num_live_applies(&self) -> Result<usize> {
        Ok(self.toposort()?.len())
    }

    /// Rebuilds the arena with only the nodes reachable from the outputs (plus the
    /// declared inputs), applying all forwarding. Returns how many Applies were
    /// dropped.
    pub fn compact(&mut self) -> Result<usize> {
        let order = self.toposort()?;
        let mut fresh = Graph::new(self.graph.config());
        let mut remap: HashMap<VarId, VarId> = HashMap::new();

        for &input in &self.inputs {
            let copied = copy_root(&mut fresh, self.graph.var(input)?);
            remap.insert(input, copied);
        }

        for &apply in &order {
            let mut mapped = Vec::with_capacity(self.graph.node(apply).inputs().len());
            for input in self.resolved_inputs(apply) {
                let target = match remap.get(&input) {
                    Some(&target) => target,
                    None => {
                        let copied = copy_root(&mut fresh, self.graph.var(input)?);
                        remap.insert(input, copied);
                        copied
                    }
                };
                mapped.push(target);
            }
            let node = self.graph.node(apply);
            let new_apply = fresh.apply(node.op().clone(), &mapped)?;
            for (old, &new) in node
                .outputs()
                .iter()
                .zip(fresh.node(new_apply).outputs())
            {
                remap.insert(*old, new);
            }
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for output in self.outputs() {
            let target = match remap.get(&output) {
                Some(&target) => target,
                None => {
                    let copied = copy_root(&mut fresh, self.graph.var(output)?);
                    remap.insert(output, copied);
                    copied
                }
            };
            outputs.push(target);
        }

        let removed = self.graph.num_applies().saturating_sub(fresh.num_applies());
        debug!(
            before = self.graph.num_applies(),
            after = fresh.num_applies(),
            "function graph compacted"
        );
        self.inputs = self.inputs.iter().map(|input| remap[input]).collect();
        self.outputs = outputs;
        self.graph = fresh;
        self.forward.clear();
        Ok(removed)
    }
}

fn copy_root(fresh: &mut Graph, var: &Variable) -> VarId {
    let id = fresh.push_variable(
        var.name().map(str::to_string),
        var.ty().clone(),
        None,
        var.kind().clone(),
    );
    if let Some(shared) = var.shared() {
        fresh.register_shared(shared, id);
    }
    id
}

impl GraphView for FunctionGraph {
    fn var(&self, id: VarId) -> Result<&Variable> {
        self.graph.var(id)
    }

    fn node(&self, id: ApplyId) -> &Apply {
        self.graph.node(id)
    }

    fn resolve(&self, mut id: VarId) -> VarId {
        while let Some(&next) = self.forward.get(&id) {
            id = next;
        }
        id
    }
}
