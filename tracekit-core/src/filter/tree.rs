//! Filter expression tree

use std::fmt;

use bitflags::bitflags;

use super::expression::SimpleExpression;
use super::FilterContext;

bitflags! {
    /// Combinator of a tree node
    ///
    /// `NOT` is a modifier: it inverts whatever the other bits produce. A
    /// node with only `NOT` set negates its left child.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LogicalOp: u8 {
        const OR = 1;
        const AND = 2;
        const NOT = 4;
        const XOR = 8;
    }
}

impl LogicalOp {
    fn symbol(self) -> &'static str {
        if self.contains(LogicalOp::AND) {
            "&&"
        } else if self.contains(LogicalOp::OR) {
            "||"
        } else if self.contains(LogicalOp::XOR) {
            "^"
        } else {
            ""
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterTree {
    /// Matches everything
    Idle,
    Node {
        op: LogicalOp,
        left: Box<FilterTree>,
        right: Box<FilterTree>,
    },
    Leaf(SimpleExpression),
}

impl Default for FilterTree {
    fn default() -> Self {
        FilterTree::Idle
    }
}

impl FilterTree {
    pub fn leaf(expression: SimpleExpression) -> Self {
        FilterTree::Leaf(expression)
    }

    pub fn combine(op: LogicalOp, left: FilterTree, right: FilterTree) -> Self {
        FilterTree::Node {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Logical negation; negating twice gives back the same tree
    pub fn negate(self) -> Self {
        match self {
            FilterTree::Node { op, left, right } => {
                let op = op ^ LogicalOp::NOT;
                if op.is_empty() && right.is_idle() {
                    *left
                } else {
                    FilterTree::Node { op, left, right }
                }
            }
            other => FilterTree::combine(LogicalOp::NOT, other, FilterTree::Idle),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, FilterTree::Idle)
    }

    /// Whether the context passes the filter
    ///
    /// A leaf whose structure is absent from the context leaves the result
    /// undecided rather than false, and an undecided filter rejects. Negating
    /// an undecided subtree keeps it undecided, so `!(pid == 1)` and
    /// `pid != 1` agree when no process is known.
    pub fn evaluate(&self, context: &FilterContext<'_>) -> bool {
        self.verdict(context).unwrap_or(false)
    }

    /// Three-valued result, `None` meaning undecided
    ///
    /// `&&` is false if either side is false and `||` true if either side
    /// is true, whatever the other side; otherwise an undecided side makes
    /// the node undecided.
    fn verdict(&self, context: &FilterContext<'_>) -> Option<bool> {
        match self {
            FilterTree::Idle => Some(true),
            FilterTree::Leaf(expression) => expression.evaluate(context),
            FilterTree::Node { op, left, right } => {
                let (left, right) = (left.verdict(context), right.verdict(context));
                let combined = if op.contains(LogicalOp::OR) && !op.contains(LogicalOp::AND) {
                    match (left, right) {
                        (Some(true), _) | (_, Some(true)) => Some(true),
                        (Some(false), Some(false)) => Some(false),
                        _ => None,
                    }
                } else if op.contains(LogicalOp::XOR) && !op.contains(LogicalOp::AND) {
                    left.zip(right).map(|(l, r)| l ^ r)
                } else {
                    // AND, and a bare NOT over its left child and an idle right
                    match (left, right) {
                        (Some(false), _) | (_, Some(false)) => Some(false),
                        (Some(true), Some(true)) => Some(true),
                        _ => None,
                    }
                };
                combined.map(|value| value ^ op.contains(LogicalOp::NOT))
            }
        }
    }
}

impl fmt::Display for FilterTree {
    /// Fully parenthesised, negations included, so the output parses back
    /// to an equivalent tree; the empty tree prints as nothing
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterTree::Idle => Ok(()),
            FilterTree::Leaf(expression) => write!(f, "{}", expression),
            FilterTree::Node { op, left, right } => {
                let negated = op.contains(LogicalOp::NOT);
                f.write_str(if negated { "(!(" } else { "(" })?;
                let symbol = op.symbol();
                if symbol.is_empty() || right.is_idle() {
                    write!(f, "{}", left)?;
                } else {
                    write!(f, "{} {} {}", left, symbol, right)?;
                }
                f.write_str(if negated { "))" } else { ")" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::state::ProcessState;

    fn admits(expression: &str, context: &FilterContext<'_>) -> bool {
        Filter::parse(expression).unwrap().tree().evaluate(context)
    }

    #[test]
    fn test_negation_keeps_missing_state_rejected() {
        let empty = FilterContext::default();
        for expression in [
            "pid != 1",
            "!(pid == 1)",
            "!pid == 1",
            "!(!(pid == 1))",
            "pid == 1 ^ pid == 2",
            "!(pid == 1 ^ pid == 2)",
            "!(pid == 1 && ppid == 0)",
        ] {
            assert!(!admits(expression, &empty), "{}", expression);
        }
    }

    #[test]
    fn test_decided_side_wins() {
        let process = ProcessState::new(1, "init");
        let state_only = FilterContext {
            state: Some(&process),
            ..FilterContext::default()
        };
        assert!(admits("pid == 1 || tracefile.cpu == 0", &state_only));
        assert!(!admits("pid == 1 && tracefile.cpu == 0", &state_only));
        assert!(admits("!(pid == 2 && tracefile.cpu == 0)", &state_only));
        assert!(!admits("!(pid == 1 || tracefile.cpu == 0)", &state_only));
        assert!(admits("", &FilterContext::default()));
    }
}
