//! Graph walks shared by differentiation, optimization, and compilation.
//!
//! Every walk goes through [`GraphView`], so the optimizer sees its rewired
//! [`FunctionGraph`](super::FunctionGraph) through the same code that walks a
//! plain [`Graph`](super::Graph).

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;

use crate::error::{GraphError, Result};
use crate::types::Type;

use super::{Apply, ApplyId, VarId, Variable};

/// Read access to an arena plus the forwarding used to rewire consumers.
pub trait GraphView {
    fn var(&self, id: VarId) -> Result<&Variable>;

    /// Looks up an Apply by id. Ids come from the same arena's owner links.
    fn node(&self, id: ApplyId) -> &Apply;

    /// Follows replacement forwarding; identity for graphs without rewiring.
    fn resolve(&self, id: VarId) -> VarId {
        id
    }

    fn ty(&self, id: VarId) -> Result<&Type> {
        Ok(self.var(id)?.ty())
    }

    /// Owner of the resolved variable, if any.
    fn producer(&self, id: VarId) -> Result<Option<&Apply>> {
        let resolved = self.resolve(id);
        Ok(self
            .var(resolved)?
            .owner()
            .map(|owner| self.node(owner.apply)))
    }

    /// Inputs of `apply` after forwarding.
    fn resolved_inputs(&self, apply: ApplyId) -> SmallVec<[VarId; 4]> {
        self.node(apply)
            .inputs()
            .iter()
            .map(|&input| self.resolve(input))
            .collect()
    }
}

/// Consumers of each variable: `(apply, input position)` pairs.
pub type Clients = HashMap<VarId, SmallVec<[(ApplyId, usize); 4]>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Topologically orders the Applies reachable from `outputs`.
///
/// Inputs are visited in declared order and outputs in the order given, so the
/// result is deterministic. Fails with [`GraphError::Cycle`] when an owner chain
/// loops back on itself, which only a bad forwarding table can produce.
pub fn toposort<G: GraphView + ?Sized>(view: &G, outputs: &[VarId]) -> Result<Vec<ApplyId>> {
    let mut marks: HashMap<ApplyId, Mark> = HashMap::new();
    let mut order = Vec::new();

    for &output in outputs {
        let Some(root) = owner_apply(view, output)? else {
            continue;
        };
        if marks.contains_key(&root) {
            continue;
        }

        // (apply, next input position to visit)
        let mut stack: Vec<(ApplyId, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::Visiting);

        while let Some(frame) = stack.last_mut() {
            let (apply, cursor) = *frame;
            let inputs = view.node(apply).inputs();
            if cursor == inputs.len() {
                stack.pop();
                marks.insert(apply, Mark::Done);
                order.push(apply);
                continue;
            }
            frame.1 += 1;

            let input = view.resolve(inputs[cursor]);
            let Some(producer) = owner_apply(view, input)? else {
                continue;
            };
            match marks.get(&producer) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => return Err(GraphError::Cycle { var: input }),
                None => {
                    marks.insert(producer, Mark::Visiting);
                    stack.push((producer, 0));
                }
            }
        }
    }

    Ok(order)
}

fn owner_apply<G: GraphView + ?Sized>(view: &G, var: VarId) -> Result<Option<ApplyId>> {
    let resolved = view.resolve(var);
    Ok(view.var(resolved)?.owner().map(|owner| owner.apply))
}

/// Applies lying on some path from one of `inputs` to one of `outputs`, in
/// topological order.
pub fn ancestors_between<G: GraphView + ?Sized>(
    view: &G,
    outputs: &[VarId],
    inputs: &[VarId],
) -> Result<Vec<ApplyId>> {
    let order = toposort(view, outputs)?;

    let mut reached: HashSet<VarId> = inputs.iter().map(|&v| view.resolve(v)).collect();
    let mut forward = Vec::new();
    for &apply in &order {
        let touches = view
            .resolved_inputs(apply)
            .iter()
            .any(|input| reached.contains(input));
        if touches {
            forward.push(apply);
            reached.extend(view.node(apply).outputs().iter().copied());
        }
    }

    let mut needed: HashSet<VarId> = outputs.iter().map(|&v| view.resolve(v)).collect();
    let mut between = Vec::new();
    for &apply in forward.iter().rev() {
        let feeds_output = view
            .node(apply)
            .outputs()
            .iter()
            .any(|out| needed.contains(out));
        if feeds_output {
            between.push(apply);
            needed.extend(view.resolved_inputs(apply));
        }
    }
    between.reverse();
    Ok(between)
}

/// Consumer index over the given Applies.
pub fn clients<G: GraphView + ?Sized>(view: &G, order: &[ApplyId]) -> Clients {
    let mut clients = Clients::new();
    for &apply in order {
        for (position, input) in view.resolved_inputs(apply).into_iter().enumerate() {
            clients.entry(input).or_default().push((apply, position));
        }
    }
    clients
}

/// Ownerless variables reachable from `outputs`, in first-visit order.
pub fn root_variables<G: GraphView + ?Sized>(view: &G, outputs: &[VarId]) -> Result<Vec<VarId>> {
    let order = toposort(view, outputs)?;
    let mut seen = HashSet::new();
    let mut roots = Vec::new();
    let mut visit = |var: VarId, roots: &mut Vec<VarId>| -> Result<()> {
        if view.var(var)?.is_root() && seen.insert(var) {
            roots.push(var);
        }
        Ok(())
    };
    for &apply in &order {
        for input in view.resolved_inputs(apply) {
            visit(input, &mut roots)?;
        }
    }
    for &output in outputs {
        visit(view.resolve(output), &mut roots)?;
    }
    Ok(roots)
}
