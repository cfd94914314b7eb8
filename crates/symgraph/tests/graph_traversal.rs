use symgraph::graph::{ancestors_between, clients, root_variables, toposort};
use symgraph::ops::functional as F;
use symgraph::{FunctionGraph, Graph, GraphError, GraphView, Value};

#[test]
fn toposort_places_producers_before_consumers() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let sum = F::add(&mut graph, x, y)?;
    let product = F::mul(&mut graph, sum, x)?;
    let out = F::exp(&mut graph, product)?;

    let order = toposort(&graph, &[out])?;
    assert_eq!(order.len(), 3);
    let position = |var| {
        let owner = graph.var(var).unwrap().owner().unwrap().apply;
        order.iter().position(|&a| a == owner).unwrap()
    };
    assert!(position(sum) < position(product));
    assert!(position(product) < position(out));
    Ok(())
}

#[test]
fn toposort_is_deterministic() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let a = graph.vector("a");
    let b = graph.vector("b");
    let left = F::mul(&mut graph, a, b)?;
    let right = F::sub(&mut graph, b, a)?;
    let out = F::add(&mut graph, left, right)?;

    let first = toposort(&graph, &[out])?;
    let second = toposort(&graph, &[out])?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn ancestors_between_keeps_only_connecting_applies() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let unrelated = F::exp(&mut graph, y)?;
    let scaled = F::mul(&mut graph, x, unrelated)?;
    let out = F::neg(&mut graph, scaled)?;

    let between = ancestors_between(&graph, &[out], &[x])?;
    assert_eq!(between.len(), 2);
    let exp_apply = graph.var(unrelated)?.owner().unwrap().apply;
    assert!(!between.contains(&exp_apply));
    Ok(())
}

#[test]
fn roots_and_clients_cover_shared_inputs() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let two = graph.scalar_constant(2.0);
    let doubled = F::mul(&mut graph, x, two)?;
    let out = F::add(&mut graph, doubled, x)?;

    let roots = root_variables(&graph, &[out])?;
    assert_eq!(roots, vec![x, two]);

    let order = toposort(&graph, &[out])?;
    let consumers = clients(&graph, &order);
    assert_eq!(consumers[&x].len(), 2);
    assert_eq!(consumers[&doubled].len(), 1);
    assert_eq!(graph.var(two)?.constant_value(), Some(&Value::scalar(2.0)));
    Ok(())
}

#[test]
fn forwarding_into_a_consumer_is_reported_as_a_cycle() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.scalar("x");
    let negated = F::neg(&mut graph, x)?;
    let out = F::exp(&mut graph, negated)?;

    let mut fgraph = FunctionGraph::new(&graph, &[x], &[out])?;
    fgraph.replace(x, negated)?;
    match fgraph.toposort() {
        Err(GraphError::Cycle { .. }) => {}
        other => panic!("expected a cycle error, got {other:?}"),
    }
    Ok(())
}
