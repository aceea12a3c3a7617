//! Leaf expressions: one field compared with one literal

use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, TraceError};
use crate::source::{FieldCatalog, ResolvedField, ScalarKind};
use crate::state::{ExecutionMode, ProcessStatus};
use crate::time::TraceTime;

use super::FilterContext;

/// Structure a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Traceset,
    Trace,
    Tracefile,
    Event,
    State,
}

impl Structure {
    /// Lookup order for field names given without a structure prefix
    pub const RESOLUTION_ORDER: [Structure; 5] = [
        Structure::Event,
        Structure::State,
        Structure::Tracefile,
        Structure::Trace,
        Structure::Traceset,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Structure::Traceset => "traceset",
            Structure::Trace => "trace",
            Structure::Tracefile => "tracefile",
            Structure::Event => "event",
            Structure::State => "state",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Structure> {
        Structure::RESOLUTION_ORDER
            .into_iter()
            .find(|s| s.prefix() == prefix)
    }
}

/// A resolved field reference
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSelector {
    TracesetName,
    TraceName,
    TracefileName,
    TracefileCpu,
    EventName,
    EventTime,
    EventTsc,
    EventTypeId,
    /// A payload field of one event type, resolved to its offset
    EventField {
        event: String,
        path: String,
        field: ResolvedField,
    },
    StatePid,
    StatePpid,
    StateCreationTime,
    StateInsertionTime,
    StateProcessName,
    StateExecutionMode,
    StateExecutionSubmode,
    StateProcessStatus,
    StateCpu,
}

/// Type a field's literal is parsed as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unsigned,
    Float,
    Str,
    Time,
    Mode,
    Status,
}

impl ValueKind {
    fn is_ordered(self) -> bool {
        matches!(self, ValueKind::Unsigned | ValueKind::Float | ValueKind::Time)
    }
}

/// Fixed fields: (structure, name, selector)
const FIELDS: &[(Structure, &str, FieldSelector)] = &[
    (Structure::Traceset, "name", FieldSelector::TracesetName),
    (Structure::Trace, "name", FieldSelector::TraceName),
    (Structure::Tracefile, "name", FieldSelector::TracefileName),
    (Structure::Tracefile, "cpu", FieldSelector::TracefileCpu),
    (Structure::Event, "name", FieldSelector::EventName),
    (Structure::Event, "time", FieldSelector::EventTime),
    (Structure::Event, "tsc", FieldSelector::EventTsc),
    (Structure::Event, "type_id", FieldSelector::EventTypeId),
    (Structure::State, "pid", FieldSelector::StatePid),
    (Structure::State, "ppid", FieldSelector::StatePpid),
    (Structure::State, "creation_time", FieldSelector::StateCreationTime),
    (Structure::State, "insertion_time", FieldSelector::StateInsertionTime),
    (Structure::State, "process_name", FieldSelector::StateProcessName),
    (Structure::State, "execution_mode", FieldSelector::StateExecutionMode),
    (Structure::State, "execution_submode", FieldSelector::StateExecutionSubmode),
    (Structure::State, "process_status", FieldSelector::StateProcessStatus),
    (Structure::State, "cpu", FieldSelector::StateCpu),
];

impl FieldSelector {
    /// Resolve a field path such as `state.pid`, `pid` or
    /// `event.field.fs_open.args[1].fd`
    pub fn resolve(path: &str, catalog: &FieldCatalog) -> Result<FieldSelector> {
        let unknown = || TraceError::UnknownField {
            path: path.to_string(),
        };

        let (structure, rest) = match path.split_once('.') {
            Some((prefix, rest)) => match Structure::from_prefix(prefix) {
                Some(structure) => (Some(structure), rest),
                None => (None, path),
            },
            None => (None, path),
        };

        match structure {
            Some(Structure::Event) if rest.starts_with("field.") => {
                let dynamic = &rest["field.".len()..];
                let (event, field_path) = dynamic.split_once('.').ok_or_else(unknown)?;
                let field = catalog.resolve(event, field_path)?;
                Ok(FieldSelector::EventField {
                    event: event.to_string(),
                    path: field_path.to_string(),
                    field,
                })
            }
            Some(structure) => Self::fixed(structure, rest).ok_or_else(unknown),
            None => Structure::RESOLUTION_ORDER
                .into_iter()
                .find_map(|s| Self::fixed(s, rest))
                .ok_or_else(unknown),
        }
    }

    fn fixed(structure: Structure, name: &str) -> Option<FieldSelector> {
        FIELDS
            .iter()
            .find(|(s, n, _)| *s == structure && *n == name)
            .map(|(_, _, selector)| selector.clone())
    }

    pub fn structure(&self) -> Structure {
        match self {
            FieldSelector::TracesetName => Structure::Traceset,
            FieldSelector::TraceName => Structure::Trace,
            FieldSelector::TracefileName | FieldSelector::TracefileCpu => Structure::Tracefile,
            FieldSelector::EventName
            | FieldSelector::EventTime
            | FieldSelector::EventTsc
            | FieldSelector::EventTypeId
            | FieldSelector::EventField { .. } => Structure::Event,
            _ => Structure::State,
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            FieldSelector::TracesetName
            | FieldSelector::TraceName
            | FieldSelector::TracefileName
            | FieldSelector::EventName
            | FieldSelector::StateProcessName
            | FieldSelector::StateExecutionSubmode => ValueKind::Str,
            FieldSelector::TracefileCpu
            | FieldSelector::EventTsc
            | FieldSelector::EventTypeId
            | FieldSelector::StatePid
            | FieldSelector::StatePpid
            | FieldSelector::StateCpu => ValueKind::Unsigned,
            FieldSelector::EventTime
            | FieldSelector::StateCreationTime
            | FieldSelector::StateInsertionTime => ValueKind::Time,
            FieldSelector::StateExecutionMode => ValueKind::Mode,
            FieldSelector::StateProcessStatus => ValueKind::Status,
            FieldSelector::EventField { field, .. } => match field.kind {
                ScalarKind::U16 | ScalarKind::U32 | ScalarKind::U64 => ValueKind::Unsigned,
                ScalarKind::F64 => ValueKind::Float,
                ScalarKind::String => ValueKind::Str,
            },
        }
    }

    /// Read the field from `context`; `None` when the structure is absent
    /// or the field does not apply to it
    fn read<'a>(&self, context: &FilterContext<'a>) -> Option<Actual<'a>> {
        let actual = match self {
            FieldSelector::TracesetName => Actual::Str(context.traceset?),
            FieldSelector::TraceName => Actual::Str(context.trace?.name()),
            FieldSelector::TracefileName => Actual::Str(&context.tracefile?.name),
            FieldSelector::TracefileCpu => Actual::Unsigned(context.tracefile?.cpu.into()),
            FieldSelector::EventName => Actual::Str(&context.event?.name),
            FieldSelector::EventTime => Actual::Time(context.event?.timestamp),
            FieldSelector::EventTsc => Actual::Unsigned(context.event?.cycles),
            FieldSelector::EventTypeId => Actual::Unsigned(context.event?.type_id.into()),
            FieldSelector::EventField { event: name, field, .. } => {
                let event = context.event?;
                if &*event.name != name.as_str() {
                    return None;
                }
                match field.kind {
                    ScalarKind::U16 => Actual::Unsigned(event.read_u16(field.offset)?.into()),
                    ScalarKind::U32 => Actual::Unsigned(event.read_u32(field.offset)?.into()),
                    ScalarKind::U64 => Actual::Unsigned(event.read_u64(field.offset)?),
                    ScalarKind::F64 => Actual::Float(event.read_f64(field.offset)?),
                    ScalarKind::String => Actual::Str(event.read_str(field.offset)?),
                }
            }
            FieldSelector::StatePid => Actual::Unsigned(context.state?.pid.into()),
            FieldSelector::StatePpid => Actual::Unsigned(context.state?.ppid.into()),
            FieldSelector::StateCreationTime => Actual::Time(context.state?.creation_time),
            FieldSelector::StateInsertionTime => Actual::Time(context.state?.insertion_time),
            FieldSelector::StateProcessName => Actual::Str(&context.state?.name),
            FieldSelector::StateExecutionMode => Actual::Mode(context.state?.execution_mode),
            FieldSelector::StateExecutionSubmode => {
                Actual::Str(&context.state?.execution_submode)
            }
            FieldSelector::StateProcessStatus => Actual::Status(context.state?.status),
            FieldSelector::StateCpu => Actual::Unsigned(context.state?.cpu.into()),
        };
        Some(actual)
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let FieldSelector::EventField { event, path, .. } = self {
            return write!(f, "event.field.{}.{}", event, path);
        }
        let name = FIELDS
            .iter()
            .find(|(_, _, selector)| selector == self)
            .map_or("?", |(_, name, _)| *name);
        write!(f, "{}.{}", self.structure().prefix(), name)
    }
}

/// Relational operator of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            RelOp::Eq => ordering == Ordering::Equal,
            RelOp::Ne => ordering != Ordering::Equal,
            RelOp::Lt => ordering == Ordering::Less,
            RelOp::Le => ordering != Ordering::Greater,
            RelOp::Gt => ordering == Ordering::Greater,
            RelOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Typed literal of a leaf
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Unsigned(u64),
    Float(f64),
    Str(String),
    Time(TraceTime),
    Mode(ExecutionMode),
    Status(ProcessStatus),
}

impl FieldValue {
    /// Parse `literal` as a value of `kind`
    pub fn parse(kind: ValueKind, literal: &str, field: &FieldSelector) -> Result<FieldValue> {
        let invalid = |reason: &str| TraceError::InvalidLiteral {
            field: field.to_string(),
            value: literal.to_string(),
            reason: reason.to_string(),
        };
        match kind {
            ValueKind::Unsigned => {
                let parsed = match literal.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => literal.parse(),
                };
                parsed
                    .map(FieldValue::Unsigned)
                    .map_err(|_| invalid("expected an unsigned integer"))
            }
            ValueKind::Float => literal
                .parse()
                .map(FieldValue::Float)
                .map_err(|_| invalid("expected a number")),
            ValueKind::Str => Ok(FieldValue::Str(literal.to_string())),
            ValueKind::Time => literal.parse().map(FieldValue::Time).map_err(|e| match e {
                TraceError::InvalidLiteral { reason, .. } => invalid(&reason),
                other => other,
            }),
            ValueKind::Mode => literal.parse().map(FieldValue::Mode),
            ValueKind::Status => literal.parse().map(FieldValue::Status),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{:?}", v),
            FieldValue::Str(s) => write_quoted(f, s),
            FieldValue::Time(t) => write!(f, "{}", t),
            FieldValue::Mode(m) => write_quoted(f, m.as_str()),
            FieldValue::Status(s) => write_quoted(f, s.as_str()),
        }
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("\"")
}

/// A field value read during evaluation
enum Actual<'a> {
    Unsigned(u64),
    Float(f64),
    Str(&'a str),
    Time(TraceTime),
    Mode(ExecutionMode),
    Status(ProcessStatus),
}

/// `field op value`
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleExpression {
    pub field: FieldSelector,
    pub op: RelOp,
    pub value: FieldValue,
}

impl SimpleExpression {
    /// Build a leaf, parsing `literal` with the field's type
    ///
    /// String-like fields (names, execution mode, process status) only
    /// support `==` and `!=`.
    pub fn new(field: FieldSelector, op: RelOp, literal: &str) -> Result<Self> {
        let kind = field.value_kind();
        if !kind.is_ordered() && !matches!(op, RelOp::Eq | RelOp::Ne) {
            return Err(TraceError::UnsupportedOperator {
                field: field.to_string(),
                op: op.symbol().to_string(),
            });
        }
        let value = FieldValue::parse(kind, literal, &field)?;
        Ok(Self { field, op, value })
    }

    /// Compare the field in `context` with the literal
    ///
    /// `None` when the leaf does not apply: the field's structure is missing
    /// from the context, or it is a payload field of another event type.
    ///
    /// # Panics
    ///
    /// If the literal's type does not match the field's, which only happens
    /// when the expression was assembled by hand inconsistently.
    pub fn evaluate(&self, context: &FilterContext<'_>) -> Option<bool> {
        let actual = self.field.read(context)?;
        let ordering = match (&actual, &self.value) {
            (Actual::Unsigned(a), FieldValue::Unsigned(b)) => a.cmp(b),
            (Actual::Float(a), FieldValue::Float(b)) => match a.partial_cmp(b) {
                Some(ordering) => ordering,
                None => return Some(self.op == RelOp::Ne),
            },
            (Actual::Str(a), FieldValue::Str(b)) => (*a).cmp(b.as_str()),
            (Actual::Time(a), FieldValue::Time(b)) => a.cmp(b),
            (Actual::Mode(a), FieldValue::Mode(b)) => {
                if a == b { Ordering::Equal } else { Ordering::Less }
            }
            (Actual::Status(a), FieldValue::Status(b)) => {
                if a == b { Ordering::Equal } else { Ordering::Less }
            }
            _ => panic!(
                "filter leaf `{}` holds a {:?} literal that does not match the field type {:?}",
                self,
                self.value,
                self.field.value_kind()
            ),
        };
        Some(self.op.holds(ordering))
    }
}

impl fmt::Display for SimpleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op.symbol(), self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{EventLayout, FieldKind};
    use crate::state::ProcessState;

    fn catalog() -> FieldCatalog {
        let mut catalog = FieldCatalog::new();
        catalog
            .insert(
                EventLayout::new("fs_open")
                    .field("fd", FieldKind::U32)
                    .field("path", FieldKind::String),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_unqualified_resolution_order() {
        let catalog = FieldCatalog::new();
        assert_eq!(
            FieldSelector::resolve("pid", &catalog).unwrap(),
            FieldSelector::StatePid
        );
        assert_eq!(
            FieldSelector::resolve("name", &catalog).unwrap(),
            FieldSelector::EventName
        );
        assert_eq!(
            FieldSelector::resolve("cpu", &catalog).unwrap(),
            FieldSelector::StateCpu
        );
        assert_eq!(
            FieldSelector::resolve("tracefile.cpu", &catalog).unwrap(),
            FieldSelector::TracefileCpu
        );
        assert!(FieldSelector::resolve("bogus", &catalog).is_err());
        assert!(FieldSelector::resolve("trace.pid", &catalog).is_err());
    }

    #[test]
    fn test_dynamic_event_field() {
        let selector = FieldSelector::resolve("event.field.fs_open.path", &catalog()).unwrap();
        assert_eq!(selector.value_kind(), ValueKind::Str);
        assert_eq!(selector.to_string(), "event.field.fs_open.path");
        assert!(FieldSelector::resolve("event.field.fs_open.mode", &catalog()).is_err());
        assert!(FieldSelector::resolve("event.field.fs_open", &catalog()).is_err());
    }

    #[test]
    fn test_operator_support() {
        let name = FieldSelector::EventName;
        assert!(SimpleExpression::new(name.clone(), RelOp::Ne, "x").is_ok());
        let err = SimpleExpression::new(name, RelOp::Lt, "x").unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_OPERATOR");

        assert!(SimpleExpression::new(FieldSelector::StatePid, RelOp::Ge, "0x2a").is_ok());
        let err = SimpleExpression::new(FieldSelector::StatePid, RelOp::Eq, "-1").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_LITERAL");
    }

    #[test]
    fn test_missing_structure_does_not_apply() {
        let leaf = SimpleExpression::new(FieldSelector::StatePid, RelOp::Ne, "1").unwrap();
        assert_eq!(leaf.evaluate(&FilterContext::default()), None);

        let process = ProcessState::new(2, "init");
        let context = FilterContext {
            state: Some(&process),
            ..FilterContext::default()
        };
        assert_eq!(leaf.evaluate(&context), Some(true));
    }

    #[test]
    fn test_time_and_mode_literals() {
        let leaf =
            SimpleExpression::new(FieldSelector::StateCreationTime, RelOp::Lt, "1.5").unwrap();
        assert_eq!(leaf.value, FieldValue::Time(TraceTime::from_secs_nanos(1, 500_000_000)));

        let mode =
            SimpleExpression::new(FieldSelector::StateExecutionMode, RelOp::Eq, "syscall").unwrap();
        let mut process = ProcessState::new(1, "init");
        process.execution_mode = ExecutionMode::Syscall;
        let context = FilterContext {
            state: Some(&process),
            ..FilterContext::default()
        };
        assert_eq!(mode.evaluate(&context), Some(true));
        assert_eq!(mode.to_string(), "state.execution_mode == \"system call\"");
    }

    #[test]
    #[should_panic(expected = "does not match the field type")]
    fn test_inconsistent_leaf_panics() {
        let leaf = SimpleExpression {
            field: FieldSelector::StatePid,
            op: RelOp::Eq,
            value: FieldValue::Str("x".to_string()),
        };
        let process = ProcessState::new(1, "init");
        leaf.evaluate(&FilterContext {
            state: Some(&process),
            ..FilterContext::default()
        });
    }
}
