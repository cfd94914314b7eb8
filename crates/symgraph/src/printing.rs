//! Indented text rendering of graphs for debugging.

use std::collections::HashSet;
use std::fmt::Write;

use crate::error::{GraphError, Result};
use crate::graph::{ApplyId, GraphView, VarId, VariableKind};

/// Renders the expression trees of `outputs`, one line per Variable.
///
/// Each line shows the producing op (or the root's kind), the variable id and
/// its type. An Apply reached a second time is printed once more with `...`
/// instead of repeating its subtree.
///
/// ```text
/// mul @a1 %v3 : tensor<float64, ()>
///  |add @a0 %v2 : tensor<float64, ()>
///  | |x %v0 : tensor<float64, ()>
///  | |y %v1 : tensor<float64, ()>
///  |add @a0 %v2 : tensor<float64, ()> ...
/// ```
pub fn debug_print<G: GraphView + ?Sized>(view: &G, outputs: &[VarId]) -> Result<String> {
    // Reject cyclic graphs before recursing.
    crate::graph::toposort(view, outputs)?;

    let mut out = String::new();
    let mut printed = HashSet::new();
    for &output in outputs {
        write_var(view, view.resolve(output), 0, &mut printed, &mut out)?;
    }
    Ok(out)
}

fn write_var<G: GraphView + ?Sized>(
    view: &G,
    var: VarId,
    depth: usize,
    printed: &mut HashSet<ApplyId>,
    out: &mut String,
) -> Result<()> {
    let variable = view.var(var)?;
    let prefix = " |".repeat(depth);
    let ty = variable.ty();

    let Some(owner) = variable.owner() else {
        let label = match variable.kind() {
            VariableKind::Constant(value) => format!("constant{{{value}}}"),
            VariableKind::Shared(_) => format!("shared {}", variable.label()),
            VariableKind::Input | VariableKind::Computed => variable.label(),
        };
        writeln!(out, "{prefix}{label} {var} : {ty}").map_err(render_error)?;
        return Ok(());
    };

    let apply = view.node(owner.apply);
    let output_index = if apply.outputs().len() > 1 {
        format!(".{}", owner.index)
    } else {
        String::new()
    };
    let name = variable
        .name()
        .map(|name| format!(" '{name}'"))
        .unwrap_or_default();

    let repeated = !printed.insert(owner.apply);
    let elided = if repeated { " ..." } else { "" };
    writeln!(
        out,
        "{prefix}{}{output_index} {} {var}{name} : {ty}{elided}",
        apply.op(),
        owner.apply
    )
    .map_err(render_error)?;
    if repeated {
        return Ok(());
    }
    for input in view.resolved_inputs(owner.apply) {
        write_var(view, input, depth + 1, printed, out)?;
    }
    Ok(())
}

fn render_error(err: std::fmt::Error) -> GraphError {
    GraphError::execution("debug_print", err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::ops::functional as F;

    #[test]
    fn shared_subexpressions_are_elided() {
        let mut graph = Graph::default();
        let x = graph.scalar("x");
        let y = graph.scalar("y");
        let sum = F::add(&mut graph, x, y).unwrap();
        let out = F::mul(&mut graph, sum, sum).unwrap();

        let text = debug_print(&graph, &[out]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("mul @a1 %v3"));
        assert!(lines[1].starts_with(" |add @a0 %v2"));
        assert!(lines[2].starts_with(" | |x %v0"));
        assert!(lines[4].ends_with("..."));
    }
}
