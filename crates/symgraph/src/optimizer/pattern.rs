use smallvec::{smallvec, SmallVec};

use crate::graph::{ApplyId, VarId};
use crate::ops::Op;

use super::rewriter::GraphRewriter;

/// Replacements proposed by a rule: each `old` output should be read as `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub replacements: SmallVec<[(VarId, VarId); 2]>,
}

impl Rewrite {
    pub fn single(old: VarId, new: VarId) -> Self {
        Self {
            replacements: smallvec![(old, new)],
        }
    }
}

/// A local rewrite over one Apply.
pub trait RewriteRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Higher runs first; equal priorities keep registration order.
    fn priority(&self) -> u16 {
        1
    }

    fn matches_op(&self, op: &Op) -> bool {
        let _ = op;
        true
    }

    /// Emits replacement nodes through the rewriter and returns the proposed
    /// replacements, or `None` when the rule does not apply.
    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite>;
}

/// Mutable set that collects rules prior to freezing.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<R>(&mut self, rule: R) -> &mut Self
    where
        R: RewriteRule + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Orders rules by descending priority. The sort is stable, so rules of
    /// equal priority are tried in the order they were added.
    pub fn freeze(mut self) -> FrozenRuleSet {
        self.rules
            .sort_by_key(|rule| std::cmp::Reverse(rule.priority()));
        FrozenRuleSet { rules: self.rules }
    }
}

/// Immutable, priority-ordered rules ready for the driver.
pub struct FrozenRuleSet {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl FrozenRuleSet {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn matching<'a>(
        &'a self,
        op: &'a Op,
    ) -> impl Iterator<Item = (usize, &'a dyn RewriteRule)> + 'a {
        self.rules
            .iter()
            .enumerate()
            .filter(move |(_, rule)| rule.matches_op(op))
            .map(|(idx, rule)| (idx, &**rule))
    }
}

/// Common op matchers.
pub mod filters {
    use crate::ops::{ElemwiseOp, Op, Transfer};

    pub fn elemwise(op: &Op, kind: ElemwiseOp) -> bool {
        matches!(op, Op::Elemwise(k) if *k == kind)
    }

    pub fn add(op: &Op) -> bool {
        elemwise(op, ElemwiseOp::Add)
    }

    pub fn sub(op: &Op) -> bool {
        elemwise(op, ElemwiseOp::Sub)
    }

    pub fn mul(op: &Op) -> bool {
        elemwise(op, ElemwiseOp::Mul)
    }

    pub fn div(op: &Op) -> bool {
        elemwise(op, ElemwiseOp::Div)
    }

    pub fn neg(op: &Op) -> bool {
        elemwise(op, ElemwiseOp::Neg)
    }

    pub fn to_device(op: &Op) -> bool {
        matches!(op, Op::Transfer(Transfer::ToDevice(_)))
    }

    pub fn to_host(op: &Op) -> bool {
        matches!(op, Op::Transfer(Transfer::ToHost))
    }
}
