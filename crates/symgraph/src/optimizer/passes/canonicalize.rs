//! Local algebraic simplifications and constant folding.

use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{ApplyId, FunctionGraph, VarId};
use crate::ops::{ElemwiseOp, Op};
use crate::optimizer::driver::{apply_rules_greedily, GreedyConfig};
use crate::optimizer::pattern::{filters, Rewrite, RewriteRule, RuleSet};
use crate::optimizer::rewriter::GraphRewriter;
use crate::optimizer::{GraphPass, OptimizeContext, PassResult};

/// The default algebraic rule set, in registration order.
pub fn canonical_rules() -> RuleSet {
    let mut rules = RuleSet::new();
    rules
        .add(CancelMulDiv)
        .add(DoubleNegation)
        .add(SubtractSelf)
        .add(IdentityArithmetic)
        .add(ConstantFold);
    rules
}

/// Runs [`canonical_rules`] greedily.
#[derive(Default)]
pub struct CanonicalizePass {
    config: GreedyConfig,
}

impl CanonicalizePass {
    const NAME: &'static str = "canonicalize";

    pub fn new(config: GreedyConfig) -> Self {
        Self { config }
    }
}

impl GraphPass for CanonicalizePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, fgraph: &mut FunctionGraph, cx: &mut OptimizeContext<'_>) -> Result<PassResult> {
        let rules = canonical_rules().freeze();
        let stats = apply_rules_greedily(fgraph, &rules, cx, &self.config)?;
        Ok(PassResult {
            changed: stats.applied > 0,
            iterations: stats.iterations,
            rewrites_applied: stats.applied,
            erased_applies: 0,
        })
    }
}

/// `(x * y) / y -> x` and `(y * x) / y -> x`.
pub struct CancelMulDiv;

impl RewriteRule for CancelMulDiv {
    fn name(&self) -> &'static str {
        "cancel_mul_div"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::div(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let [numerator, denominator] = pair(rewriter, apply)?;
        let product = rewriter.producer(numerator)?;
        if !filters::mul(rewriter.op(product)) {
            return None;
        }
        let [x, y] = pair(rewriter, product)?;
        let kept = if y == denominator {
            x
        } else if x == denominator {
            y
        } else {
            return None;
        };
        Some(Rewrite::single(rewriter.output(apply), kept))
    }
}

/// `-(-x) -> x`.
pub struct DoubleNegation;

impl RewriteRule for DoubleNegation {
    fn name(&self) -> &'static str {
        "double_negation"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::neg(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let inner = rewriter.producer(*rewriter.inputs(apply).first()?)?;
        if !filters::neg(rewriter.op(inner)) {
            return None;
        }
        let x = *rewriter.inputs(inner).first()?;
        Some(Rewrite::single(rewriter.output(apply), x))
    }
}

/// `x - x -> zeros_like(x)`.
pub struct SubtractSelf;

impl RewriteRule for SubtractSelf {
    fn name(&self) -> &'static str {
        "subtract_self"
    }

    fn priority(&self) -> u16 {
        10
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::sub(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let [x, y] = pair(rewriter, apply)?;
        if x != y {
            return None;
        }
        let zeros = rewriter.emit(Op::Fill { value: 0.0 }, &[x]).ok()?;
        Some(Rewrite::single(rewriter.output(apply), zeros))
    }
}

/// Removes additive zeros and multiplicative ones.
pub struct IdentityArithmetic;

impl RewriteRule for IdentityArithmetic {
    fn name(&self) -> &'static str {
        "identity_arithmetic"
    }

    fn priority(&self) -> u16 {
        5
    }

    fn matches_op(&self, op: &Op) -> bool {
        filters::add(op) || filters::sub(op) || filters::mul(op) || filters::div(op)
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let Op::Elemwise(kind) = rewriter.op(apply) else {
            return None;
        };
        let kind = *kind;
        let [lhs, rhs] = pair(rewriter, apply)?;
        let is = |var, expected: f64| rewriter.uniform_value(var) == Some(expected);
        let kept = match kind {
            ElemwiseOp::Add if is(rhs, 0.0) => lhs,
            ElemwiseOp::Add if is(lhs, 0.0) => rhs,
            ElemwiseOp::Sub if is(rhs, 0.0) => lhs,
            ElemwiseOp::Mul if is(rhs, 1.0) => lhs,
            ElemwiseOp::Mul if is(lhs, 1.0) => rhs,
            ElemwiseOp::Div if is(rhs, 1.0) => lhs,
            _ => return None,
        };
        Some(Rewrite::single(rewriter.output(apply), kept))
    }
}

/// Evaluates pure Applies whose inputs are all constants.
pub struct ConstantFold;

impl RewriteRule for ConstantFold {
    fn name(&self) -> &'static str {
        "constant_fold"
    }

    fn matches_op(&self, op: &Op) -> bool {
        !op.is_side_effecting() && !op.is_transfer() && !matches!(op, Op::OnDevice { .. })
    }

    fn match_and_rewrite(&self, apply: ApplyId, rewriter: &mut GraphRewriter<'_>) -> Option<Rewrite> {
        let inputs = rewriter.inputs(apply);
        if inputs.is_empty() {
            return None;
        }
        let values = inputs
            .iter()
            .map(|&input| rewriter.constant_value(input).cloned())
            .collect::<Option<Vec<_>>>()?;
        let results = rewriter.op(apply).perform(&values).ok()?;

        let outputs = rewriter.outputs(apply).to_vec();
        if outputs.len() != results.len() {
            return None;
        }
        let mut replacements = SmallVec::new();
        for (old, value) in outputs.into_iter().zip(results) {
            let ty = rewriter.type_of(old)?.clone();
            let folded = rewriter.emit_constant(value, ty).ok()?;
            replacements.push((old, folded));
        }
        Some(Rewrite { replacements })
    }
}

fn pair(rewriter: &GraphRewriter<'_>, apply: ApplyId) -> Option<[VarId; 2]> {
    match rewriter.inputs(apply).as_slice() {
        &[a, b] => Some([a, b]),
        _ => None,
    }
}
