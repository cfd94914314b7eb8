//! Pattern-based graph optimizer.
//!
//! Rules ([`RewriteRule`]) propose local replacements; the greedy driver
//! applies them in priority order with type checking; passes ([`GraphPass`])
//! bundle rules or whole-graph transforms; the pipeline runs passes, some of
//! them to a bounded fixed point.

mod context;
pub mod driver;
mod events;
pub mod passes;
pub mod pattern;
pub mod pipeline;
pub mod rewriter;

use std::sync::Arc;

use crate::compile::KernelRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::graph::FunctionGraph;

pub use context::{OptimizeConfig, OptimizeContext};
pub use driver::{apply_rules_greedily, GreedyConfig, GreedyRewriteStats};
pub use events::{OptimizeEvent, OptimizeReport};
pub use pattern::{FrozenRuleSet, Rewrite, RewriteRule, RuleSet};
pub use pipeline::{PipelineBuilder, PipelineOptimizer, Step};
pub use rewriter::GraphRewriter;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Number of rewrite iterations executed while applying the pass.
    pub iterations: usize,
    /// Total number of rewrites applied by the pass.
    pub rewrites_applied: usize,
    /// Applies dropped from the arena (by compaction).
    pub erased_applies: usize,
}

impl PassResult {
    /// Merges two run results, accumulating statistics.
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            iterations: self.iterations + other.iterations,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
            erased_applies: self.erased_applies + other.erased_applies,
        }
    }
}

/// A transformation over a whole [`FunctionGraph`].
pub trait GraphPass: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult>;
}

pub trait Optimizer: Send + Sync {
    fn optimize(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult>;
}

/// Builds the pipeline selected by the configured optimizer mode.
pub fn default_optimizer(cfg: &OptimizeConfig) -> Arc<dyn Optimizer> {
    Arc::new(PipelineOptimizer::new(cfg))
}

/// Optimizes `fgraph` in place with the pipeline selected by `config`.
pub fn optimize(
    fgraph: &mut FunctionGraph,
    config: &Config,
    kernels: &KernelRegistry,
) -> Result<OptimizeReport> {
    let cfg = OptimizeConfig::from(config);
    let optimizer = default_optimizer(&cfg);
    let mut cx = OptimizeContext::new(cfg, kernels);
    let result = optimizer.optimize(fgraph, &mut cx)?;
    Ok(OptimizeReport {
        result,
        events: cx.take_events(),
    })
}
