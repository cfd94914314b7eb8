//! Executable plan emitted by [`compile`](super::compile).

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::Device;
use crate::error::Result;
use crate::graph::{FunctionGraph, GraphView, VarId, VariableKind};
use crate::ops::Op;
use crate::shared::SharedVariable;
use crate::types::Type;
use crate::value::Value;

use super::kernels::{KernelHandle, KernelRegistry};

/// One Apply of the schedule, addressed by value slots.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledNode {
    /// Display form of the op, e.g. `gpu0.mul`.
    pub op_name: String,
    pub kernel: KernelHandle,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
    /// Slots whose last reader is this node; dropped after it runs.
    pub release: Vec<usize>,
    /// Declared type of each input slot, checked against runtime shapes.
    pub input_types: Vec<Type>,
    #[serde(skip)]
    pub(crate) op: Op,
}

impl ScheduledNode {
    pub fn op(&self) -> &Op {
        &self.op
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InputBinding {
    pub name: Option<String>,
    pub slot: usize,
    pub ty: Type,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstantBinding {
    pub slot: usize,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SharedBinding {
    pub name: Option<String>,
    pub slot: usize,
    pub ty: Type,
    #[serde(skip)]
    pub(crate) storage: SharedVariable,
}

/// Linear schedule plus slot bindings for a compacted [`FunctionGraph`].
///
/// Every Variable the schedule touches owns one slot. Roots are bound before
/// the first node runs: declared inputs from call arguments, constants from
/// the plan, shared variables from their storage.
#[derive(Debug, Clone, Serialize)]
pub struct CompiledGraph {
    pub device: Device,
    pub num_slots: usize,
    pub inputs: Vec<InputBinding>,
    pub constants: Vec<ConstantBinding>,
    pub shared: Vec<SharedBinding>,
    pub schedule: Vec<ScheduledNode>,
    pub outputs: Vec<usize>,
}

impl CompiledGraph {
    /// Lowers `fgraph` to a plan. Forwarding must already be compacted away.
    pub fn build(fgraph: &FunctionGraph, kernels: &KernelRegistry, device: Device) -> Result<Self> {
        let order = fgraph.toposort()?;
        let outputs = fgraph.outputs();

        let mut slots: HashMap<VarId, usize> = HashMap::new();
        let mut slot_of = |var: VarId| {
            let next = slots.len();
            *slots.entry(var).or_insert(next)
        };

        let mut inputs = Vec::with_capacity(fgraph.inputs().len());
        for &input in fgraph.inputs() {
            let var = fgraph.var(input)?;
            inputs.push(InputBinding {
                name: var.name().map(str::to_string),
                slot: slot_of(input),
                ty: var.ty().clone(),
            });
        }

        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        let referenced = order
            .iter()
            .flat_map(|&apply| fgraph.resolved_inputs(apply))
            .chain(outputs.iter().copied());
        for var in referenced {
            if fgraph.var(var)?.is_root() && seen.insert(var) {
                roots.push(var);
            }
        }

        let mut constants = Vec::new();
        let mut shared = Vec::new();
        for root in roots {
            let var = fgraph.var(root)?;
            match var.kind() {
                VariableKind::Constant(value) => constants.push(ConstantBinding {
                    slot: slot_of(root),
                    value: value.clone(),
                }),
                VariableKind::Shared(storage) => shared.push(SharedBinding {
                    name: var.name().map(str::to_string),
                    slot: slot_of(root),
                    ty: var.ty().clone(),
                    storage: storage.clone(),
                }),
                VariableKind::Input | VariableKind::Computed => {}
            }
        }

        let mut schedule = Vec::with_capacity(order.len());
        for &apply in &order {
            let node = fgraph.node(apply);
            let resolved = fgraph.resolved_inputs(apply);
            let input_types = resolved
                .iter()
                .map(|&var| fgraph.ty(var).cloned())
                .collect::<Result<Vec<_>>>()?;
            let node_inputs = resolved.into_iter().map(&mut slot_of).collect();
            let node_outputs = node.outputs().iter().map(|&out| slot_of(out)).collect();
            schedule.push(ScheduledNode {
                op_name: node.op().to_string(),
                kernel: kernels.resolve(node.op())?,
                inputs: node_inputs,
                outputs: node_outputs,
                release: Vec::new(),
                input_types,
                op: node.op().clone(),
            });
        }

        let outputs: Vec<usize> = outputs.into_iter().map(&mut slot_of).collect();
        let num_slots = slots.len();

        let mut plan = Self {
            device,
            num_slots,
            inputs,
            constants,
            shared,
            schedule,
            outputs,
        };
        plan.plan_releases();
        Ok(plan)
    }

    /// Fills every node's release list: a slot is released right after its
    /// last reader unless it is a function output.
    fn plan_releases(&mut self) {
        let kept: HashSet<usize> = self.outputs.iter().copied().collect();
        let mut last_used_at: HashMap<usize, usize> = HashMap::new();
        for (idx, node) in self.schedule.iter().enumerate() {
            for &slot in &node.inputs {
                last_used_at.insert(slot, idx);
            }
        }

        let mut free_points: Vec<(usize, usize)> = last_used_at
            .into_iter()
            .filter(|(slot, _)| !kept.contains(slot))
            .collect();
        free_points.sort_unstable();
        for (slot, idx) in free_points {
            self.schedule[idx].release.push(slot);
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.schedule.len()
    }

    /// Kernel handle of every scheduled node, in order.
    pub fn kernels(&self) -> impl Iterator<Item = &KernelHandle> {
        self.schedule.iter().map(|node| &node.kernel)
    }

    /// Number of scheduled host/device transfers.
    pub fn num_transfers(&self) -> usize {
        self.schedule.iter().filter(|node| node.op.is_transfer()).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::ops::functional as F;

    #[test]
    fn intermediate_slots_are_released_after_last_reader() {
        let mut graph = Graph::default();
        let x = graph.vector("x");
        let squared = F::mul(&mut graph, x, x).unwrap();
        let shifted = F::exp(&mut graph, squared).unwrap();
        let out = F::sum_all(&mut graph, shifted).unwrap();

        let fgraph = FunctionGraph::new(&graph, &[x], &[out]).unwrap();
        let plan = CompiledGraph::build(&fgraph, &KernelRegistry::default(), Device::Cpu).unwrap();

        assert_eq!(plan.num_nodes(), 3);
        assert_eq!(plan.inputs[0].slot, 0);
        // x is read only by the first node, exp's result only by the sum.
        assert_eq!(plan.schedule[0].release, vec![0]);
        assert_eq!(plan.schedule[2].release, plan.schedule[1].outputs);
        let out_slot = plan.outputs[0];
        assert!(plan.schedule.iter().all(|node| !node.release.contains(&out_slot)));
    }

    #[test]
    fn plan_serializes_kernels_and_constants() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let two = graph.scalar_constant(2.0);
        let out = F::mul(&mut graph, x, two).unwrap();

        let fgraph = FunctionGraph::new(&graph, &[x], &[out]).unwrap();
        let plan = CompiledGraph::build(&fgraph, &KernelRegistry::default(), Device::Cpu).unwrap();
        let json: serde_json::Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();

        assert_eq!(json["schedule"][0]["kernel"], "cpu.mul");
        assert_eq!(json["constants"].as_array().unwrap().len(), 1);
        assert_eq!(json["inputs"][0]["name"], "x");
    }
}
