use symgraph::ops::functional as F;
use symgraph::ops::Transfer;
use symgraph::{compile, CompileOptions, Config, Device, Graph, KernelRegistry, Op, Value};

fn gpu_config() -> Config {
    Config::default().with_device(Device::Gpu(0))
}

fn count_transfers(function: &symgraph::Function, wanted: fn(&Transfer) -> bool) -> usize {
    function
        .plan()
        .schedule
        .iter()
        .filter(|node| matches!(node.op(), Op::Transfer(t) if wanted(t)))
        .count()
}

#[test]
fn adjacent_device_ops_exchange_device_values() -> anyhow::Result<()> {
    let config = gpu_config();
    let mut graph = Graph::new(&config);
    let x = graph.scalar("x");
    let y = graph.scalar("y");
    let product = F::mul(&mut graph, x, y)?;
    let grown = F::exp(&mut graph, product)?;
    let out = F::add(&mut graph, grown, x)?;

    let function = compile(&graph, &[x, y], &[out], CompileOptions::default())?;
    let uploads = count_transfers(&function, |t| matches!(t, Transfer::ToDevice(0)));
    let downloads = count_transfers(&function, |t| matches!(t, Transfer::ToHost));
    assert_eq!(uploads, 2, "one upload per host input");
    assert_eq!(downloads, 1, "only the output returns to the host");

    let kernels: Vec<&str> = function.plan().kernels().map(|k| k.name()).collect();
    for expected in ["gpu0.mul", "gpu0.exp", "gpu0.add", "transfer.h2d", "transfer.d2h"] {
        assert!(kernels.contains(&expected), "missing {expected} in {kernels:?}");
    }
    assert!(!kernels.iter().any(|k| k.starts_with("cpu.")));

    let result = function.call(&[Value::scalar(0.5), Value::scalar(2.0)])?;
    let expected = 1.0_f64.exp() + 0.5;
    assert!((result[0].to_scalar().unwrap() - expected).abs() < 1e-12);
    Ok(())
}

#[test]
fn cpu_target_keeps_host_kernels() -> anyhow::Result<()> {
    let mut graph = Graph::default();
    let x = graph.vector("x");
    let out = F::exp(&mut graph, x)?;

    let function = compile(&graph, &[x], &[out], CompileOptions::default())?;
    assert_eq!(function.plan().num_transfers(), 0);
    assert_eq!(function.plan().schedule[0].kernel.name(), "cpu.exp");
    Ok(())
}

#[test]
fn ops_without_device_kernel_stay_on_host() -> anyhow::Result<()> {
    let config = gpu_config();
    let mut graph = Graph::new(&config);
    let x = graph.vector("x");
    let squared = F::mul(&mut graph, x, x)?;
    let out = F::log(&mut graph, squared)?;

    let mut kernels = KernelRegistry::empty();
    kernels.register("mul", Device::Gpu(0), "gpu0.mul_tiled");
    kernels.register("log", Device::Cpu, "cpu.log");
    let options = CompileOptions::default().with_kernels(kernels);
    let function = compile(&graph, &[x], &[out], options)?;

    let kernels: Vec<&str> = function.plan().kernels().map(|k| k.name()).collect();
    assert_eq!(kernels, vec!["transfer.h2d", "gpu0.mul_tiled", "transfer.d2h", "cpu.log"]);

    let input = Value::tensor(vec![2], vec![1.0, 2.0])?;
    let result = function.call(&[input])?;
    let data = result[0].as_tensor().unwrap().data().to_vec();
    assert!((data[1] - 4.0_f64.ln()).abs() < 1e-12);
    Ok(())
}
