use symgraph::ops::functional as F;
use symgraph::ops::Distribution;
use symgraph::optimizer::{
    apply_rules_greedily, optimize, GreedyConfig, GraphRewriter, OptimizeConfig, OptimizeContext,
    OptimizeEvent, Rewrite, RewriteRule, RuleSet,
};
use symgraph::types::DType;
use symgraph::{
    compile, debug_print, ApplyId, CompileOptions, Config, FunctionGraph, Graph, KernelRegistry,
    Op, OptimizerMode, SharedVariable, TensorType, Value,
};

fn with_mode(mode: OptimizerMode) -> CompileOptions {
    CompileOptions::default().with_config(Config::default().with_optimizer(mode))
}

#[test]
fn multiply_then_divide_cancels() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let product = F::mul(&mut graph, x, y)?;
    let out = F::div(&mut graph, product, y)?;

    let args = [Value::scalar(3.0), Value::scalar(5.0)];
    let optimized = compile(&graph, &[x, y], &[out], CompileOptions::default())?;
    let plain = compile(&graph, &[x, y], &[out], with_mode(OptimizerMode::None))?;

    assert_eq!(optimized.call(&args)?[0].to_scalar(), Some(3.0));
    assert_eq!(plain.call(&args)?[0].to_scalar(), Some(3.0));
    assert!(optimized.plan().num_nodes() < plain.plan().num_nodes());
    assert_eq!(optimized.plan().num_nodes(), 0);
    Ok(())
}

#[test]
fn algebraic_identities_collapse() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let zero = graph.scalar_constant(0.0);
    let one = graph.scalar_constant(1.0);
    let plus_zero = F::add(&mut graph, x, zero)?;
    let times_one = F::mul(&mut graph, one, plus_zero)?;
    let negated = F::neg(&mut graph, times_one)?;
    let out = F::neg(&mut graph, negated)?;

    let function = compile(&graph, &[x], &[out], CompileOptions::default())?;
    assert_eq!(function.plan().num_nodes(), 0);
    let value = Value::tensor(vec![2], vec![1.5, -2.0])?;
    assert_eq!(function.call(&[value.clone()])?[0], value);
    Ok(())
}

#[test]
fn subtracting_a_value_from_itself_yields_zeros() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let out = F::sub(&mut graph, x, x)?;

    let function = compile(&graph, &[x], &[out], CompileOptions::default())?;
    assert_eq!(function.plan().schedule[0].op_name, "fill{0}");
    let result = function.call(&[Value::tensor(vec![3], vec![1.0, 2.0, 3.0])?])?;
    assert_eq!(result[0], Value::tensor(vec![3], vec![0.0; 3])?);
    Ok(())
}

#[test]
fn constant_subexpressions_are_folded() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let two = graph.scalar_constant(2.0);
    let three = graph.scalar_constant(3.0);
    let five = F::add(&mut graph, two, three)?;
    let out = F::mul(&mut graph, x, five)?;

    let function = compile(&graph, &[x], &[out], CompileOptions::default())?;
    let plan = function.plan();
    assert_eq!(plan.num_nodes(), 1);
    assert_eq!(plan.constants.len(), 1);
    assert_eq!(plan.constants[0].value.to_scalar(), Some(5.0));
    assert_eq!(function.call(&[Value::scalar(2.0)])?[0].to_scalar(), Some(10.0));
    Ok(())
}

#[test]
fn common_subexpressions_merge() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let y = graph.vector("y");
    let first = F::mul(&mut graph, x, y)?;
    let second = F::mul(&mut graph, x, y)?;
    let out = F::add(&mut graph, first, second)?;

    let function = compile(&graph, &[x, y], &[out], with_mode(OptimizerMode::FastCompile))?;
    assert_eq!(function.plan().num_nodes(), 2);
    let result = function.call(&[
        Value::tensor(vec![2], vec![1.0, 2.0])?,
        Value::tensor(vec![2], vec![3.0, 4.0])?,
    ])?;
    assert_eq!(result[0], Value::tensor(vec![2], vec![6.0, 16.0])?);
    Ok(())
}

#[test]
fn random_draws_are_never_merged() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let state = SharedVariable::new(Some("rng"), Value::RandomState(7));
    let rng = graph.shared(&state);
    let uniform = Distribution::Uniform { low: 0.0, high: 1.0 };
    let (_, a) = F::random(&mut graph, rng, uniform, &[2])?;
    let (_, b) = F::random(&mut graph, rng, uniform, &[2])?;
    let out = F::add(&mut graph, a, b)?;

    let function = compile(&graph, &[], &[out], CompileOptions::default())?;
    let draws = function
        .plan()
        .schedule
        .iter()
        .filter(|node| matches!(node.op(), Op::Random(_)))
        .count();
    assert_eq!(draws, 2);
    Ok(())
}

#[test]
fn optimizing_twice_changes_nothing() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let zero = graph.scalar_constant(0.0);
    let product = F::mul(&mut graph, x, y)?;
    let ratio = F::div(&mut graph, product, y)?;
    let shifted = F::add(&mut graph, ratio, zero)?;
    let squared = F::mul(&mut graph, shifted, shifted)?;
    let out = F::exp(&mut graph, squared)?;

    let config = Config::default();
    let kernels = KernelRegistry::default();
    let mut fgraph = FunctionGraph::new(&graph, &[x, y], &[out])?;
    let first = optimize(&mut fgraph, &config, &kernels)?;
    assert!(first.result.rewrites_applied > 0);
    let once = debug_print(&fgraph, &fgraph.outputs())?;

    let second = optimize(&mut fgraph, &config, &kernels)?;
    assert_eq!(second.result.rewrites_applied, 0);
    assert!(!second.result.changed);
    assert_eq!(debug_print(&fgraph, &fgraph.outputs())?, once);
    Ok(())
}

/// Replaces an Apply's output with a scalar constant, whatever its type.
struct CollapseToScalar;

impl RewriteRule for CollapseToScalar {
    fn name(&self) -> &'static str {
        "collapse_to_scalar"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let scalar = TensorType::scalar(DType::Float64).into();
        let constant = rewriter.emit_constant(Value::scalar(0.0), scalar).ok()?;
        Some(Rewrite::single(rewriter.output(apply), constant))
    }
}

struct KeepInput {
    name: &'static str,
    position: usize,
    priority: u16,
}

impl RewriteRule for KeepInput {
    fn name(&self) -> &'static str {
        self.name
    }

    fn priority(&self) -> u16 {
        self.priority
    }

    fn matches_op(&self, op: &Op) -> bool {
        matches!(op, Op::Elemwise(_))
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let input = *rewriter.inputs(apply).get(self.position)?;
        Some(Rewrite::single(rewriter.output(apply), input))
    }
}

#[test]
fn type_changing_rewrite_is_skipped_and_next_rule_runs() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let y = graph.vector("y");
    let out = F::add(&mut graph, x, y)?;

    let mut fgraph = FunctionGraph::new(&graph, &[x, y], &[out])?;
    let mut rules = RuleSet::new();
    rules.add(CollapseToScalar).add(KeepInput {
        name: "keep_lhs",
        position: 0,
        priority: 1,
    });
    let kernels = KernelRegistry::default();
    let mut cx = OptimizeContext::new(OptimizeConfig::default(), &kernels);
    let stats = apply_rules_greedily(&mut fgraph, &rules.freeze(), &mut cx, &GreedyConfig::default())?;

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(fgraph.outputs(), vec![x]);
    match cx.events() {
        [OptimizeEvent::Skipped { rule, expected, found, .. }] => {
            assert_eq!(*rule, "collapse_to_scalar");
            assert_ne!(expected, found);
        }
        other => panic!("unexpected events: {other:?}"),
    }
    Ok(())
}

#[test]
fn equal_priority_rules_fire_in_registration_order() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let out = F::mul(&mut graph, x, y)?;
    let kernels = KernelRegistry::default();

    for (first, expected) in [(0, x), (1, y)] {
        let mut fgraph = FunctionGraph::new(&graph, &[x, y], &[out])?;
        let mut rules = RuleSet::new();
        rules
            .add(KeepInput {
                name: "first",
                position: first,
                priority: 3,
            })
            .add(KeepInput {
                name: "second",
                position: 1 - first,
                priority: 3,
            });
        let mut cx = OptimizeContext::new(OptimizeConfig::default(), &kernels);
        apply_rules_greedily(&mut fgraph, &rules.freeze(), &mut cx, &GreedyConfig::default())?;
        assert_eq!(fgraph.outputs(), vec![expected]);
    }
    Ok(())
}

#[test]
fn exhausted_budget_is_reported_and_graph_kept() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let product = F::mul(&mut graph, x, y)?;
    let out = F::div(&mut graph, product, y)?;

    let config = Config::default().with_max_passes(1);
    let function = compile(&graph, &[x, y], &[out], CompileOptions::default().with_config(config))?;
    assert!(function.report().budget_exceeded());
    let event = function
        .report()
        .events
        .iter()
        .find(|event| matches!(event, OptimizeEvent::BudgetExceeded { .. }))
        .unwrap();
    assert!(event.to_string().contains("did not converge within 1 iterations"));
    assert_eq!(
        function.call(&[Value::scalar(3.0), Value::scalar(5.0)])?[0].to_scalar(),
        Some(3.0)
    );
    Ok(())
}
