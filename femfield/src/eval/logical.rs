//! Min / max combinators
use super::Evaluation;
use crate::context::LogicalOp;

impl LogicalOp {
    /// Applies the combinator to a single pair of values
    pub fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            LogicalOp::And => a.min(b),
            LogicalOp::Or => a.max(b),
            LogicalOp::Xor => a.max(b) * (1.0 - a).max(1.0 - b),
        }
    }
}

/// Combines two operands component-wise; never produces derivatives
pub(crate) fn evaluate(op: LogicalOp, a: &Evaluation, b: &Evaluation) -> Evaluation {
    Evaluation::from_values(
        a.values
            .iter()
            .zip(&b.values)
            .map(|(a, b)| op.apply(*a, *b))
            .collect(),
    )
}
