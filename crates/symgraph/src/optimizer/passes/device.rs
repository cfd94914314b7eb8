//! Device specialization and transfer cleanup.

use std::collections::HashSet;

use smallvec::SmallVec;

use crate::config::Device;
use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph};
use crate::ops::{Op, Transfer};
use crate::optimizer::driver::{apply_rules_greedily, GreedyConfig};
use crate::optimizer::pattern::{filters, Rewrite, RewriteRule, RuleSet};
use crate::optimizer::rewriter::GraphRewriter;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};
use crate::types::{Location, Type};

/// Moves host Applies onto the configured accelerator when the kernel registry
/// provides a device kernel for their op kind.
///
/// `op(a, b)` becomes `to_host(gpuN.op(to_device(a), to_device(b)))`. Does
/// nothing when the configured device is the CPU.
#[derive(Default)]
pub struct DeviceSpecializationPass {
    config: GreedyConfig,
}

impl DeviceSpecializationPass {
    const NAME: &'static str = "device_specialization";
}

impl GraphPass for DeviceSpecializationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let Device::Gpu(device) = cx.config().device else {
            return Ok(PassResult::default());
        };
        let kinds = cx.kernels().kinds_for(Device::Gpu(device));
        let mut rules = RuleSet::new();
        rules.add(SpecializeForDevice { device, kinds });
        let stats = apply_rules_greedily(fgraph, &rules.freeze(), cx, &self.config)?;
        Ok(PassResult {
            changed: stats.applied > 0,
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_applies: 0,
        })
    }
}

pub struct SpecializeForDevice {
    pub device: u32,
    /// Op kinds with a kernel on `device`.
    pub kinds: HashSet<String>,
}

impl RewriteRule for SpecializeForDevice {
    fn name(&self) -> &'static str {
        "specialize_for_device"
    }

    fn matches_op(&self, op: &Op) -> bool {
        if op.is_transfer() || matches!(op, Op::OnDevice { .. }) || op.is_side_effecting() {
            return false;
        }
        let has_device_kernel = match op {
            Op::Custom(custom) => custom.implementation().device_kernel(self.device).is_some(),
            _ => false,
        };
        has_device_kernel || self.kinds.contains(&op.kind())
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let inputs = rewriter.inputs(apply);
        let all_host = inputs.iter().all(|&input| {
            matches!(rewriter.type_of(input), Some(Type::Tensor(tt)) if tt.location == Location::Host)
        });
        if inputs.is_empty() || !all_host {
            return None;
        }

        let mut on_device = SmallVec::<[_; 4]>::new();
        for &input in &inputs {
            let moved = rewriter
                .emit(Op::Transfer(Transfer::ToDevice(self.device)), &[input])
                .ok()?;
            on_device.push(moved);
        }
        let op = rewriter.op(apply).clone();
        let specialized = rewriter
            .emit_apply(
                Op::OnDevice {
                    device: self.device,
                    op: Box::new(op),
                },
                &on_device,
            )
            .ok()?;

        let old_outputs = rewriter.outputs(apply).to_vec();
        let new_outputs = rewriter.outputs(specialized).to_vec();
        let mut replacements = SmallVec::new();
        for (old, new) in old_outputs.into_iter().zip(new_outputs) {
            let back = rewriter.emit(Op::Transfer(Transfer::ToHost), &[new]).ok()?;
            replacements.push((old, back));
        }
        Some(Rewrite { replacements })
    }
}

/// Removes transfer round trips left behind by specialization so adjacent
/// device Applies exchange device-resident values directly.
#[derive(Default)]
pub struct TransferEliminationPass {
    config: GreedyConfig,
}

impl TransferEliminationPass {
    const NAME: &'static str = "transfer_elimination";
}

impl GraphPass for TransferEliminationPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let mut rules = RuleSet::new();
        rules.add(FoldDeviceRoundTrip).add(FoldHostRoundTrip);
        let stats = apply_rules_greedily(fgraph, &rules.freeze(), cx, &self.config)?;
        Ok(PassResult {
            changed: stats.applied > 0,
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_applies: 0,
        })
    }
}

/// `to_device(to_host(x)) -> x` when `x` already lives on the target device.
pub struct FoldDeviceRoundTrip;

impl RewriteRule for FoldDeviceRoundTrip {
    fn name(&self) -> &'static str {
        "fold_device_round_trip"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::to_device(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let Op::Transfer(Transfer::ToDevice(device)) = *rewriter.op(apply) else {
            return None;
        };
        let host = *rewriter.inputs(apply).first()?;
        let fetch = rewriter.producer(host)?;
        if !filters::to_host(rewriter.op(fetch)) {
            return None;
        }
        let source = *rewriter.inputs(fetch).first()?;
        match rewriter.type_of(source)? {
            Type::Tensor(tt) if tt.location == Location::Device(device) => {
                Some(Rewrite::single(rewriter.output(apply), source))
            }
            _ => None,
        }
    }
}

/// `to_host(to_device(x)) -> x`.
pub struct FoldHostRoundTrip;

impl RewriteRule for FoldHostRoundTrip {
    fn name(&self) -> &'static str {
        "fold_host_round_trip"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::to_host(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let device_value = *rewriter.inputs(apply).first()?;
        let upload = rewriter.producer(device_value)?;
        if !filters::to_device(rewriter.op(upload)) {
            return None;
        }
        let source = *rewriter.inputs(upload).first()?;
        Some(Rewrite::single(rewriter.output(apply), source))
    }
}
