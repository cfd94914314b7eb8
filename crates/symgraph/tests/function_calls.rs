use std::collections::HashMap;
use std::thread;

use symgraph::ops::functional as F;
use symgraph::types::DType;
use symgraph::{
    compile, CompileOptions, Config, FloatX, Graph, GraphError, GraphView, RandomStreams,
    SharedVariable, Value,
};

#[test]
fn repeated_calls_reuse_one_plan() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let y = graph.vector("y");
    let out = F::add(&mut graph, x, y)?;

    let function = compile(&graph, &[x, y], &[out], CompileOptions::default())?;
    let plan = function.plan() as *const _;
    for scale in [1.0, 2.0, 3.0] {
        let result = function.call(&[
            Value::tensor(vec![2], vec![scale, scale])?,
            Value::tensor(vec![2], vec![1.0, 1.0])?,
        ])?;
        assert_eq!(result[0], Value::tensor(vec![2], vec![scale + 1.0; 2])?);
        assert!(std::ptr::eq(plan, function.plan()));
    }
    Ok(())
}

#[test]
fn shared_updates_persist_across_calls() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let w = SharedVariable::new(Some("w"), Value::scalar(1.0));
    let w_var = graph.shared(&w);
    let x = graph.scalar("x");
    let out = F::mul(&mut graph, w_var, x)?;
    let next = F::add(&mut graph, w_var, x)?;

    let options = CompileOptions::default().with_updates([(w_var, next)]);
    let function = compile(&graph, &[x], &[out], options)?;

    assert_eq!(function.call(&[Value::scalar(2.0)])?[0].to_scalar(), Some(2.0));
    assert_eq!(w.get_value().to_scalar(), Some(3.0));
    assert_eq!(function.call(&[Value::scalar(2.0)])?[0].to_scalar(), Some(6.0));
    assert_eq!(w.get_value().to_scalar(), Some(5.0));
    Ok(())
}

#[test]
fn updates_read_values_from_before_the_call() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let a = SharedVariable::new(Some("a"), Value::scalar(1.0));
    let b = SharedVariable::new(Some("b"), Value::scalar(2.0));
    let a_var = graph.shared(&a);
    let b_var = graph.shared(&b);
    let total = F::add(&mut graph, a_var, b_var)?;

    let options = CompileOptions::default().with_updates([(a_var, b_var), (b_var, a_var)]);
    let function = compile(&graph, &[], &[total], options)?;
    function.call(&[])?;

    assert_eq!(a.get_value().to_scalar(), Some(2.0));
    assert_eq!(b.get_value().to_scalar(), Some(1.0));
    Ok(())
}

#[test]
fn update_targets_must_be_shared_and_same_typed() {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let v = graph.vector("v");
    let w = SharedVariable::new(Some("w"), Value::scalar(0.0));
    let w_var = graph.shared(&w);

    let not_shared = CompileOptions::default().with_updates([(x, x)]);
    let err = compile(&graph, &[x], &[x], not_shared).unwrap_err();
    assert!(matches!(err, GraphError::InvalidUpdate { var, .. } if var == x));

    let wrong_type = CompileOptions::default().with_updates([(w_var, v)]);
    let err = compile(&graph, &[v], &[v], wrong_type).unwrap_err();
    assert!(matches!(err, GraphError::InvalidUpdate { var, .. } if var == w_var));
}

#[test]
fn random_streams_advance_and_reseed_reproducibly() -> anyhow::Result<()> {
    let build = || -> anyhow::Result<(RandomStreams, symgraph::Function)> {
        let mut graph = Graph::default();
        let mut streams = RandomStreams::new(42);
        let sample = streams.normal(&mut graph, &[4], 0.0, 1.0)?;
        let function = compile(&graph, &[], &[sample], CompileOptions::default())?;
        Ok((streams, function))
    };

    let (mut streams, function) = build()?;
    let first = function.call(&[])?.remove(0);
    let second = function.call(&[])?.remove(0);
    assert_ne!(first, second, "the default update advances the generator");

    let (_, twin) = build()?;
    assert_eq!(twin.call(&[])?.remove(0), first);

    streams.seed(42)?;
    assert_eq!(function.call(&[])?.remove(0), first);
    Ok(())
}

#[test]
fn default_updates_can_be_disabled() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let mut streams = RandomStreams::new(7);
    let sample = streams.uniform(&mut graph, &[3], -1.0, 1.0)?;
    let options = CompileOptions::default().without_default_updates();
    let function = compile(&graph, &[], &[sample], options)?;

    assert!(function.update_targets().is_empty());
    let first = function.call(&[])?.remove(0);
    assert_eq!(function.call(&[])?.remove(0), first);
    assert!(first
        .as_tensor()
        .unwrap()
        .data()
        .iter()
        .all(|v| (-1.0..1.0).contains(v)));
    Ok(())
}

#[test]
fn call_map_keys_by_variable() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let sum = F::add(&mut graph, x, y)?;
    let diff = F::sub(&mut graph, x, y)?;

    let function = compile(&graph, &[x, y], &[sum, diff], CompileOptions::default())?;
    let args = HashMap::from([(x, Value::scalar(5.0)), (y, Value::scalar(2.0))]);
    let results = function.call_map(&args)?;
    assert_eq!(results[&sum].to_scalar(), Some(7.0));
    assert_eq!(results[&diff].to_scalar(), Some(3.0));

    let missing = HashMap::from([(x, Value::scalar(5.0))]);
    let err = function.call_map(&missing).unwrap_err();
    assert!(matches!(err, GraphError::MissingInput { var, .. } if var == y));
    Ok(())
}

#[test]
fn arguments_are_checked_against_input_types() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let v = graph.vector("v");
    let out = F::exp(&mut graph, v)?;
    let function = compile(&graph, &[v], &[out], CompileOptions::default())?;

    let matrix = Value::tensor(vec![2, 2], vec![0.0; 4])?;
    assert!(matches!(
        function.call(&[matrix]),
        Err(GraphError::InvalidInput { ref name, .. }) if name == "v"
    ));
    assert!(matches!(
        function.call(&[]),
        Err(GraphError::InvalidInput { .. })
    ));
    Ok(())
}

#[test]
fn undeclared_inputs_are_rejected_at_compile_time() {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let out = F::mul(&mut graph, x, y).unwrap();
    let err = compile(&graph, &[x], &[out], CompileOptions::default()).unwrap_err();
    assert!(matches!(err, GraphError::MissingInput { var, .. } if var == y));
}

#[test]
fn float32_configuration_rounds_results() -> anyhow::Result<()> {
    let config = Config::cpu().with_float_x(FloatX::Float32);
    let mut graph = Graph::new(&config);
    let x = graph.scalar("x");
    assert_eq!(graph.ty(x)?.tensor().unwrap().dtype, DType::Float32);

    let third = graph.scalar_constant(1.0 / 3.0);
    let out = F::mul(&mut graph, x, third)?;
    let function = compile(&graph, &[x], &[out], CompileOptions::default())?;
    let result = function.call(&[Value::scalar(1.0)])?.remove(0);
    let tensor = result.as_tensor().unwrap();
    assert_eq!(tensor.dtype(), DType::Float32);
    assert_eq!(tensor.data()[0], f64::from((1.0_f64 / 3.0) as f32));
    Ok(())
}

#[test]
fn plan_exports_as_json() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.matrix("x");
    let y = graph.matrix("y");
    let product = F::dot(&mut graph, x, y)?;
    let out = F::transpose(&mut graph, product)?;

    let function = compile(&graph, &[x, y], &[out], CompileOptions::default())?;
    let json: serde_json::Value = serde_json::from_str(&function.plan().to_json()?)?;
    let kernels: Vec<&str> = json["schedule"]
        .as_array()
        .unwrap()
        .iter()
        .map(|node| node["kernel"].as_str().unwrap())
        .collect();
    assert_eq!(kernels, vec!["cpu.dot", "cpu.transpose"]);
    assert_eq!(json["device"], "Cpu");
    assert_eq!(json["outputs"].as_array().unwrap().len(), 1);
    Ok(())
}

#[test]
fn independent_graphs_compile_in_parallel() {
    let results: Vec<f64> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                scope.spawn(move || {
                    let mut graph = Graph::default();
                    let x = graph.scalar("x");
                    let y = graph.scalar("y");
                    let product = F::mul(&mut graph, x, y).unwrap();
                    let out = F::div(&mut graph, product, y).unwrap();
                    let function = compile(&graph, &[x, y], &[out], CompileOptions::default()).unwrap();
                    function
                        .call(&[Value::scalar(i as f64), Value::scalar(5.0)])
                        .unwrap()[0]
                        .to_scalar()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results, vec![0.0, 1.0, 2.0, 3.0]);
}
