use crate::error::Result;
use crate::graph::FunctionGraph;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// Compacts the function graph: applies all forwarding and drops every node
/// that no output depends on.
///
/// Dropping orphaned nodes alone does not count as a change; only pending
/// forwarding does, so a fixed point ending with this pass can converge.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl DeadCodeEliminationPass {
    const NAME: &'static str = "dead_code_elimination";
}

impl GraphPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, fgraph: &mut FunctionGraph, _cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let rewired = fgraph.has_forwarding();
        let erased = fgraph.compact()?;
        Ok(PassResult {
            changed: rewired,
            iterations: 1,
            rewrites_applied: 0,
            erased_applies: erased,
        })
    }
}
