use std::fmt;

use crate::graph::ApplyId;
use crate::types::Type;

use super::PassResult;

/// Non-fatal optimizer outcomes, reported alongside the optimized graph.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizeEvent {
    /// A rule proposed a replacement whose type differs from the original.
    /// The site was left unchanged and later rules were tried.
    Skipped {
        rule: &'static str,
        apply: ApplyId,
        expected: Type,
        found: Type,
    },
    /// A fixed-point step was still changing the graph when its iteration
    /// budget ran out. The graph reached so far is kept.
    BudgetExceeded { step: String, max_iters: usize },
}

impl fmt::Display for OptimizeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeEvent::Skipped {
                rule,
                apply,
                expected,
                found,
            } => write!(
                f,
                "rewrite `{rule}` skipped at {apply}: expected {expected}, found {found}"
            ),
            OptimizeEvent::BudgetExceeded { step, max_iters } => {
                write!(f, "`{step}` did not converge within {max_iters} iterations")
            }
        }
    }
}

/// Statistics and events of one optimizer run.
#[derive(Debug, Clone, Default)]
pub struct OptimizeReport {
    pub result: PassResult,
    pub events: Vec<OptimizeEvent>,
}

impl OptimizeReport {
    pub fn skipped(&self) -> impl Iterator<Item = &OptimizeEvent> {
        self.events
            .iter()
            .filter(|event| matches!(event, OptimizeEvent::Skipped { .. }))
    }

    pub fn budget_exceeded(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, OptimizeEvent::BudgetExceeded { .. }))
    }
}
