use std::collections::HashMap;

use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph, GraphView, VarId};
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Merges equal constants and common subexpressions.
///
/// Constants of equal type and value collapse to the first occurrence. Then
/// every pure Apply is keyed by `(op, resolved inputs)`; a later Apply with an
/// existing key has its outputs forwarded to the earlier one. Random draws and
/// impure custom ops are never merged.
#[derive(Default)]
pub struct MergePass;

impl MergePass {
    const NAME: &'static str = "merge";
}

impl GraphPass for MergePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, fgraph: &mut FunctionGraph, _cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let mut stats = PassResult::default();
        let order = fgraph.toposort()?;

        let mut constants: HashMap<Vec<u8>, VarId> = HashMap::new();
        let mut used: Vec<VarId> = Vec::new();
        for &apply in &order {
            used.extend(fgraph.resolved_inputs(apply));
        }
        used.extend(fgraph.outputs());
        for var in used {
            let var = fgraph.resolve(var);
            let node = fgraph.var(var)?;
            let Some(value) = node.constant_value() else {
                continue;
            };
            let key = match bincode::serialize(&(node.ty(), value)) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match constants.get(&key).copied() {
                Some(existing) if existing != var => {
                    merge_into(fgraph, var, existing, &mut stats)?;
                }
                Some(_) => {}
                None => {
                    constants.insert(key, var);
                }
            }
        }

        let mut seen: HashMap<Vec<u8>, ApplyId> = HashMap::new();
        for &apply in &order {
            stats.iterations = stats.iterations.saturating_add(1);
            let op = fgraph.node(apply).op();
            if op.is_side_effecting() {
                continue;
            }
            let inputs = fgraph.resolved_inputs(apply);
            let key = match bincode::serialize(&(op, inputs.as_slice())) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match seen.get(&key).copied() {
                Some(existing) => {
                    let pairs: Vec<(VarId, VarId)> = fgraph
                        .node(apply)
                        .outputs()
                        .iter()
                        .copied()
                        .zip(fgraph.node(existing).outputs().iter().copied())
                        .collect();
                    for (from, to) in pairs {
                        merge_into(fgraph, from, to, &mut stats)?;
                    }
                }
                None => {
                    seen.insert(key, apply);
                }
            }
        }

        Ok(stats)
    }
}

fn merge_into(
    fgraph: &mut FunctionGraph,
    from: VarId,
    to: VarId,
    stats: &mut PassResult,
) -> Result<()> {
    if fgraph.replace(from, to)? {
        stats.changed = true;
        stats.rewrites_applied += 1;
    }
    Ok(())
}
