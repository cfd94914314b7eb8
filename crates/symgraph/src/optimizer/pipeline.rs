use std::sync::Arc;

use tracing::debug;

use crate::config::{Device, OptimizerMode};
use crate::error::Result;
use crate::graph::FunctionGraph;

use super::passes::{
    CanonicalizePass, DeadCodeEliminationPass, DeviceSpecializationPass, MergePass,
    TransferEliminationPass,
};
use super::{GraphPass, OptimizeConfig, OptimizeContext, OptimizeEvent, Optimizer, PassResult};

pub enum Step {
    Pass(Arc<dyn GraphPass>),
    FixedPoint { max_iters: usize, steps: Vec<Step> },
}

impl Step {
    fn label(&self) -> String {
        match self {
            Step::Pass(pass) => pass.name().to_string(),
            Step::FixedPoint { steps, .. } => {
                let inner: Vec<String> = steps.iter().map(Step::label).collect();
                format!("fixed_point({})", inner.join(", "))
            }
        }
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, pass: Arc<dyn GraphPass>) {
        self.steps.push(Step::Pass(pass));
    }

    /// Repeats the steps built by `build` until none of them changes the graph
    /// or `max_iters` rounds have run.
    pub fn fixed_point<F>(&mut self, max_iters: usize, build: F)
    where
        F: FnOnce(&mut PipelineBuilder),
    {
        let mut inner = PipelineBuilder::new();
        build(&mut inner);
        self.steps.push(Step::FixedPoint {
            max_iters: max_iters.max(1),
            steps: inner.steps,
        });
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

/// Ordered optimization steps selected by an [`OptimizerMode`].
pub struct PipelineOptimizer {
    steps: Vec<Step>,
}

impl PipelineOptimizer {
    pub fn new(cfg: &OptimizeConfig) -> Self {
        let mut builder = PipelineBuilder::new();
        let max = cfg.max_passes;

        match cfg.mode {
            OptimizerMode::FastRun => {
                builder.fixed_point(max, |p| {
                    p.pass(Arc::new(CanonicalizePass::default()));
                    p.pass(Arc::new(MergePass));
                    p.pass(Arc::new(DeadCodeEliminationPass));
                });
                if matches!(cfg.device, Device::Gpu(_)) {
                    builder.pass(Arc::new(DeviceSpecializationPass::default()));
                    builder.fixed_point(max, |p| {
                        p.pass(Arc::new(TransferEliminationPass::default()));
                        p.pass(Arc::new(MergePass));
                        p.pass(Arc::new(DeadCodeEliminationPass));
                    });
                }
            }
            OptimizerMode::FastCompile => {
                builder.fixed_point(max, |p| {
                    p.pass(Arc::new(MergePass));
                    p.pass(Arc::new(DeadCodeEliminationPass));
                });
            }
            OptimizerMode::None => {}
        }
        builder.pass(Arc::new(DeadCodeEliminationPass));

        Self::from_steps(builder.finish())
    }

    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

impl Optimizer for PipelineOptimizer {
    fn optimize(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let mut result = PassResult::default();
        run_steps(&self.steps, fgraph, cx, &mut result)?;
        Ok(result)
    }
}

fn run_steps(
    steps: &[Step],
    fgraph: &mut FunctionGraph,
    cx: &mut OptimizeContext<'_>,
    totals: &mut PassResult,
) -> Result<bool> {
    let mut changed_any = false;
    for step in steps {
        match step {
            Step::Pass(pass) => {
                let stats = pass.run(fgraph, cx)?;
                debug!(
                    pass = pass.name(),
                    changed = stats.changed,
                    rewrites = stats.rewrites_applied,
                    erased = stats.erased_applies,
                    "optimizer pass finished"
                );
                changed_any |= stats.changed;
                *totals = totals.merge(stats);
            }
            Step::FixedPoint { max_iters, steps: inner } => {
                let mut iter = 0usize;
                loop {
                    iter += 1;
                    let mut local = PassResult::default();
                    let changed = run_steps(inner, fgraph, cx, &mut local)?;
                    *totals = totals.merge(local);
                    changed_any |= changed;
                    if !changed {
                        break;
                    }
                    if iter >= *max_iters {
                        cx.record(OptimizeEvent::BudgetExceeded {
                            step: step.label(),
                            max_iters: *max_iters,
                        });
                        break;
                    }
                }
            }
        }
    }
    Ok(changed_any)
}
