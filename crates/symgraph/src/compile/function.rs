use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{GraphError, Result};
use crate::graph::{traversal, FunctionGraph, Graph, GraphView, VarId};
use crate::optimizer::{self, OptimizeReport};
use crate::shared::SharedVariable;
use crate::value::Value;

use super::executor;
use super::kernels::KernelRegistry;
use super::plan::CompiledGraph;

/// Options accepted by [`compile`].
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// `(shared variable, new value expression)` pairs written back after every
    /// call.
    pub updates: Vec<(VarId, VarId)>,
    /// Ignore the default updates registered on the graph (random streams).
    pub no_default_updates: bool,
    /// Overrides the graph's configuration.
    pub config: Option<Config>,
    /// Overrides the built-in kernel registry.
    pub kernels: Option<Arc<KernelRegistry>>,
}

impl CompileOptions {
    pub fn with_updates(mut self, updates: impl IntoIterator<Item = (VarId, VarId)>) -> Self {
        self.updates.extend(updates);
        self
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_kernels(mut self, kernels: KernelRegistry) -> Self {
        self.kernels = Some(Arc::new(kernels));
        self
    }

    pub fn without_default_updates(mut self) -> Self {
        self.no_default_updates = true;
        self
    }
}

/// A compiled, callable graph region.
///
/// The plan is built once and reused by every call. Shared variables are read
/// when a call starts; their updates are written only after every output and
/// update value of the call has been computed.
#[derive(Debug, Clone)]
pub struct Function {
    plan: Arc<CompiledGraph>,
    inputs: Vec<VarId>,
    outputs: Vec<VarId>,
    update_targets: Vec<SharedVariable>,
    report: OptimizeReport,
}

/// Optimizes the subgraph computing `outputs` (and every update) from
/// `inputs` and lowers it to an executable plan.
pub fn compile(
    graph: &Graph,
    inputs: &[VarId],
    outputs: &[VarId],
    options: CompileOptions,
) -> Result<Function> {
    let config = options.config.unwrap_or_else(|| graph.config().clone());
    let kernels = options.kernels.unwrap_or_default();

    let updates = collect_updates(graph, outputs, &options.updates, options.no_default_updates)?;
    let mut targets = Vec::with_capacity(updates.len());
    let mut roots = outputs.to_vec();
    for &(shared, expr) in &updates {
        let storage = graph
            .var(shared)?
            .shared()
            .cloned()
            .ok_or_else(|| GraphError::InvalidUpdate {
                var: shared,
                message: "only shared variables can be updated".to_string(),
            })?;
        targets.push(storage);
        roots.push(expr);
    }

    let mut fgraph = FunctionGraph::new(graph, inputs, &roots)?;
    let applies_before = fgraph.num_live_applies()?;
    let report = optimizer::optimize(&mut fgraph, &config, &kernels)?;
    if fgraph.has_forwarding() {
        fgraph.compact()?;
    }
    let plan = CompiledGraph::build(&fgraph, &kernels, config.device)?;

    info!(
        device = %config.device,
        inputs = inputs.len(),
        outputs = outputs.len(),
        updates = targets.len(),
        applies_before,
        applies_after = plan.num_nodes(),
        events = report.events.len(),
        "function compiled"
    );

    Ok(Function {
        plan: Arc::new(plan),
        inputs: inputs.to_vec(),
        outputs: outputs.to_vec(),
        update_targets: targets,
        report,
    })
}

/// Explicit updates, then the default updates of every shared variable the
/// function reads, until no new shared variable is reached.
fn collect_updates(
    graph: &Graph,
    outputs: &[VarId],
    explicit: &[(VarId, VarId)],
    no_default_updates: bool,
) -> Result<Vec<(VarId, VarId)>> {
    let mut updates = Vec::with_capacity(explicit.len());
    let mut targeted = HashSet::new();
    for &(shared, expr) in explicit {
        let target = graph.var(shared)?;
        if target.shared().is_none() {
            return Err(GraphError::InvalidUpdate {
                var: shared,
                message: "only shared variables can be updated".to_string(),
            });
        }
        let expr_ty = graph.var(expr)?.ty();
        if expr_ty != target.ty() {
            return Err(GraphError::InvalidUpdate {
                var: shared,
                message: format!("update of type {expr_ty} does not match {}", target.ty()),
            });
        }
        if !targeted.insert(shared) {
            return Err(GraphError::InvalidUpdate {
                var: shared,
                message: "updated more than once".to_string(),
            });
        }
        updates.push((shared, expr));
    }
    if no_default_updates {
        return Ok(updates);
    }

    let mut frontier: Vec<VarId> = outputs
        .iter()
        .copied()
        .chain(updates.iter().map(|&(_, expr)| expr))
        .collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for root in traversal::root_variables(graph, &frontier)? {
            if targeted.contains(&root) {
                continue;
            }
            if let Some(expr) = graph.default_update(root) {
                debug!(shared = %root, update = %expr, "adding default update");
                targeted.insert(root);
                updates.push((root, expr));
                next.push(expr);
            }
        }
        frontier = next;
    }
    Ok(updates)
}

impl Function {
    /// Runs the plan on positional arguments, one per declared input.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        if args.len() != self.plan.inputs.len() {
            return Err(GraphError::InvalidInput {
                name: "arguments".to_string(),
                message: format!(
                    "function takes {} inputs, got {}",
                    self.plan.inputs.len(),
                    args.len()
                ),
            });
        }
        let mut filtered = Vec::with_capacity(args.len());
        for (binding, arg) in self.plan.inputs.iter().zip(args) {
            let value = binding
                .ty
                .filter(arg.clone())
                .map_err(|message| GraphError::InvalidInput {
                    name: binding
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("input {}", binding.slot)),
                    message,
                })?;
            filtered.push(value);
        }

        let mut values = executor::execute(&self.plan, filtered)?;
        let updates = values.split_off(self.outputs.len());
        for (target, value) in self.update_targets.iter().zip(updates) {
            target.set_value(value)?;
        }
        Ok(values)
    }

    /// Runs the plan on arguments keyed by the caller's input VarIds and returns
    /// values keyed by the caller's output VarIds.
    pub fn call_map(&self, args: &HashMap<VarId, Value>) -> Result<HashMap<VarId, Value>> {
        let mut positional = Vec::with_capacity(self.inputs.len());
        for (&input, binding) in self.inputs.iter().zip(&self.plan.inputs) {
            let value = args.get(&input).ok_or_else(|| GraphError::MissingInput {
                var: input,
                name: binding.name.clone().unwrap_or_else(|| input.to_string()),
            })?;
            positional.push(value.clone());
        }
        let values = self.call(&positional)?;
        Ok(self.outputs.iter().copied().zip(values).collect())
    }

    pub fn plan(&self) -> &CompiledGraph {
        &self.plan
    }

    /// Optimizer statistics and events recorded while compiling.
    pub fn report(&self) -> &OptimizeReport {
        &self.report
    }

    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[VarId] {
        &self.outputs
    }

    /// Shared variables written back after every call, in update order.
    pub fn update_targets(&self) -> &[SharedVariable] {
        &self.update_targets
    }
}
