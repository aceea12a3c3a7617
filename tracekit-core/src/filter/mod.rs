//! Event filters
//!
//! A [`Filter`] is compiled once from a textual expression such as
//! `pid == 42 && event.name == "sched_switch"` into a [`FilterTree`]. Field
//! paths are resolved against a [`FieldCatalog`] at that point, so evaluating
//! a leaf during replay is an offset read plus a comparison.
//!
//! # Example
//!
//! ```rust
//! use tracekit_core::filter::{Filter, FilterContext};
//! use tracekit_core::state::ProcessState;
//!
//! let filter = Filter::parse("pid == 42 && process_name == \"bash\"").unwrap();
//! let process = ProcessState::new(42, "bash");
//! assert!(filter.filter_state(&process));
//! assert!(!filter.evaluate(&FilterContext::default()));
//! ```

mod expression;
mod parser;
mod tree;

pub use expression::{FieldSelector, FieldValue, RelOp, SimpleExpression, Structure, ValueKind};
pub use tree::{FilterTree, LogicalOp};

use crate::error::Result;
use crate::source::{Event, FieldCatalog, TracefileInfo};
use crate::state::ProcessState;
use crate::traceset::Trace;

/// The structures a filter may look at
///
/// Any of them may be missing. A leaf on a missing structure is undecided,
/// and a filter whose result hinges on an undecided leaf rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterContext<'a> {
    pub traceset: Option<&'a str>,
    pub trace: Option<&'a Trace>,
    pub tracefile: Option<&'a TracefileInfo>,
    pub event: Option<&'a Event>,
    pub state: Option<&'a ProcessState>,
}

/// A compiled filter expression
#[derive(Debug, Clone, Default)]
pub struct Filter {
    expression: String,
    tree: FilterTree,
    catalog: FieldCatalog,
}

impl Filter {
    /// Compile an expression that only uses the fixed fields
    pub fn parse(expression: &str) -> Result<Self> {
        Self::parse_with_catalog(expression, FieldCatalog::new())
    }

    /// Compile an expression that may address event payload fields
    /// described in `catalog`
    pub fn parse_with_catalog(expression: &str, catalog: FieldCatalog) -> Result<Self> {
        let tree = parser::parse(expression, &catalog)?;
        Ok(Self {
            expression: expression.trim().to_string(),
            tree,
            catalog,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn tree(&self) -> &FilterTree {
        &self.tree
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Replace the expression; on error the filter keeps its previous value
    pub fn update(&mut self, expression: &str) -> Result<()> {
        self.tree = parser::parse(expression, &self.catalog)?;
        self.expression = expression.trim().to_string();
        Ok(())
    }

    /// Narrow the filter: the result admits what both the current and the
    /// appended expression admit
    pub fn append_expression(&mut self, expression: &str) -> Result<()> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(());
        }
        if self.expression.is_empty() {
            return self.update(expression);
        }
        let combined = format!("({}) && ({})", self.expression, expression);
        self.update(&combined)
    }

    /// Back to an empty filter that admits everything
    pub fn clear_expression(&mut self) {
        self.expression.clear();
        self.tree = FilterTree::Idle;
    }

    pub fn evaluate(&self, context: &FilterContext<'_>) -> bool {
        self.tree.evaluate(context)
    }

    /// Evaluate against one event of `trace`, with the process running on
    /// the event's cpu if known
    pub fn filter_event(&self, trace: &Trace, event: &Event, state: Option<&ProcessState>) -> bool {
        self.evaluate(&FilterContext {
            traceset: None,
            trace: Some(trace),
            tracefile: Some(event.tracefile.as_ref()),
            event: Some(event),
            state,
        })
    }

    pub fn filter_tracefile(&self, tracefile: &TracefileInfo) -> bool {
        self.evaluate(&FilterContext {
            tracefile: Some(tracefile),
            ..FilterContext::default()
        })
    }

    pub fn filter_trace(&self, trace: &Trace) -> bool {
        self.evaluate(&FilterContext {
            trace: Some(trace),
            ..FilterContext::default()
        })
    }

    pub fn filter_state(&self, state: &ProcessState) -> bool {
        self.evaluate(&FilterContext {
            state: Some(state),
            ..FilterContext::default()
        })
    }
}
