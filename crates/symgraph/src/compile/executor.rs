//! Reference interpreter for [`CompiledGraph`] plans.
//!
//! Every kernel, device ones included, is evaluated with the op's host
//! implementation; transfers are identities on the value.

use tracing::trace;

use crate::error::{GraphError, Result};
use crate::value::Value;

use super::plan::CompiledGraph;

/// Runs `plan` on already type-checked positional `args` and returns the value
/// of every declared output.
pub fn execute(plan: &CompiledGraph, args: Vec<Value>) -> Result<Vec<Value>> {
    if args.len() != plan.inputs.len() {
        return Err(GraphError::InvalidInput {
            name: "arguments".to_string(),
            message: format!("expected {} values, got {}", plan.inputs.len(), args.len()),
        });
    }

    let mut slots: Vec<Option<Value>> = vec![None; plan.num_slots];
    for (binding, value) in plan.inputs.iter().zip(args) {
        slots[binding.slot] = Some(value);
    }
    for binding in &plan.constants {
        slots[binding.slot] = Some(binding.value.clone());
    }
    for binding in &plan.shared {
        slots[binding.slot] = Some(binding.storage.get_value());
    }

    for node in &plan.schedule {
        let mut inputs = Vec::with_capacity(node.inputs.len());
        for &slot in &node.inputs {
            let value = slots[slot].clone().ok_or_else(|| {
                GraphError::execution(node.op_name.clone(), format!("slot {slot} is empty"))
            })?;
            inputs.push(value);
        }
        trace!(kernel = %node.kernel, inputs = inputs.len(), "running kernel");
        node.op.check_broadcast(&inputs, &node.input_types)?;
        let results = node.op.perform(&inputs)?;
        if results.len() != node.outputs.len() {
            return Err(GraphError::execution(
                node.op_name.clone(),
                format!(
                    "kernel produced {} values for {} outputs",
                    results.len(),
                    node.outputs.len()
                ),
            ));
        }
        for (&slot, value) in node.outputs.iter().zip(results) {
            slots[slot] = Some(value);
        }
        for &slot in &node.release {
            slots[slot] = None;
        }
    }

    plan.outputs
        .iter()
        .map(|&slot| {
            slots[slot]
                .clone()
                .ok_or_else(|| GraphError::execution("output", format!("slot {slot} was never written")))
        })
        .collect()
}
