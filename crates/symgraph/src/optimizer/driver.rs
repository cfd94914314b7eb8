use std::collections::{HashMap, HashSet, VecDeque};

use smallvec::SmallVec;
use tracing::debug;

use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph, GraphView, VarId};

use super::pattern::FrozenRuleSet;
use super::rewriter::GraphRewriter;
use super::{OptimizeContext, OptimizeEvent};

#[derive(Debug, Clone)]
pub struct GreedyConfig {
    pub max_iterations: usize,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GreedyRewriteStats {
    pub iterations: usize,
    pub applied: usize,
    pub skipped: usize,
}

type FailureKey = (usize, ApplyId);

/// Applies `rules` until no live Apply matches any of them.
///
/// Applies are visited in topological order. At each site the rules are tried
/// in priority order and the first one whose rewrite type-checks wins. A
/// rewrite that would change a variable's type is recorded as
/// [`OptimizeEvent::Skipped`] and the next rule is tried. After every applied
/// rewrite the worklist is rebuilt from the rewired graph.
pub fn apply_rules_greedily(
    fgraph: &mut FunctionGraph,
    rules: &FrozenRuleSet,
    cx: &mut OptimizeContext<'_>,
    cfg: &GreedyConfig,
) -> Result<GreedyRewriteStats> {
    let mut stats = GreedyRewriteStats::default();
    if rules.is_empty() {
        return Ok(stats);
    }

    let mut worklist = VecDeque::new();
    let mut live = HashSet::new();
    seed_worklist(fgraph, &mut worklist, &mut live)?;

    // A failed match is retried only once the site's resolved inputs change.
    let mut failure_cache: HashMap<FailureKey, SmallVec<[VarId; 4]>> = HashMap::new();

    while let Some(apply) = worklist.pop_front() {
        if stats.iterations >= cfg.max_iterations {
            break;
        }
        if !live.contains(&apply) {
            continue;
        }

        let op = fgraph.node(apply).op().clone();
        let inputs = fgraph.resolved_inputs(apply);
        let mut applied = false;

        for (idx, rule) in rules.matching(&op) {
            if failure_cache.get(&(idx, apply)) == Some(&inputs) {
                continue;
            }

            let proposal = {
                let mut rewriter = GraphRewriter::new(fgraph);
                rule.match_and_rewrite(apply, &mut rewriter)
            };
            let Some(rewrite) = proposal else {
                failure_cache.insert((idx, apply), inputs.clone());
                continue;
            };

            let mut mismatch = None;
            let mut effective = false;
            for &(old, new) in &rewrite.replacements {
                let (old, new) = (fgraph.resolve(old), fgraph.resolve(new));
                effective |= old != new;
                let expected = fgraph.ty(old)?;
                let found = fgraph.ty(new)?;
                if expected != found {
                    mismatch = Some((expected.clone(), found.clone()));
                    break;
                }
            }
            if let Some((expected, found)) = mismatch {
                stats.skipped += 1;
                cx.record(OptimizeEvent::Skipped {
                    rule: rule.name(),
                    apply,
                    expected,
                    found,
                });
                failure_cache.insert((idx, apply), inputs.clone());
                continue;
            }
            if !effective {
                failure_cache.insert((idx, apply), inputs.clone());
                continue;
            }

            for &(old, new) in &rewrite.replacements {
                fgraph.replace(old, new)?;
            }
            debug!(rule = rule.name(), apply = %apply, "rewrite applied");
            stats.applied += 1;
            stats.iterations = stats.iterations.saturating_add(1);
            applied = true;
            break;
        }

        if applied {
            seed_worklist(fgraph, &mut worklist, &mut live)?;
        }
    }

    Ok(stats)
}

fn seed_worklist(
    fgraph: &FunctionGraph,
    worklist: &mut VecDeque<ApplyId>,
    live: &mut HashSet<ApplyId>,
) -> Result<()> {
    let order = fgraph.toposort()?;
    worklist.clear();
    live.clear();
    live.extend(order.iter().copied());
    worklist.extend(order);
    Ok(())
}
