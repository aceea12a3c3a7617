//! # tracekit core - trace replay engine
//!
//! tracekit replays recorded execution traces in timestamp order and hands
//! each event to pluggable analyses:
//!
//! - **Hooks**: priority-ordered callback registries ([`hooks`]) wired into
//!   the replay loop without static coupling between analyses
//! - **Tracesets**: groups of traces merged into one event stream, replayed
//!   through [`Traceset::begin`] / [`Traceset::middle`] / [`Traceset::end`]
//!   and repositioned with time, position and event-count seeks
//! - **Filters**: compiled boolean expressions over event, process state,
//!   tracefile and trace fields ([`filter`])
//!
//! Trace formats plug in through the [`source::TraceDecoder`] trait; the
//! bundled [`source::MemoryDecoder`] serves in-memory and JSON traces.
//!
//! ## Example
//!
//! ```rust
//! use tracekit_core::hooks::Priority;
//! use tracekit_core::source::{MemoryDecoder, MemoryTraceBuilder};
//! use tracekit_core::{EventContext, Filter, PhaseHooks, TraceTime, Traceset};
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! // Two cpus of one trace
//! let trace = MemoryTraceBuilder::new("demo")
//!     .tracefile("cpu_0", 0)
//!     .tracefile("cpu_1", 1)
//!     .event(0, TraceTime::from_nanos(10), "sched_switch", json!({}))
//!     .event(1, TraceTime::from_nanos(15), "irq_entry", json!({}))
//!     .event(0, TraceTime::from_nanos(20), "irq_entry", json!({}))
//!     .build()
//!     .unwrap();
//! let mut decoder = MemoryDecoder::new();
//! let handle = decoder.insert(trace).unwrap();
//!
//! let mut traceset = Traceset::new(Box::new(decoder));
//! traceset.attach(handle).unwrap();
//! traceset.set_filter(Some(Filter::parse("event.name == \"irq_entry\"").unwrap()));
//!
//! // Record the cpu of every admitted event
//! let cpus = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&cpus);
//! let mut hooks = PhaseHooks::default();
//! hooks.event.add_fn(Priority::DEFAULT, move |_, ctx: &EventContext| {
//!     sink.lock().unwrap().push(ctx.event.cpu());
//!     false
//! });
//!
//! traceset.begin(&hooks).unwrap();
//! assert_eq!(traceset.middle(TraceTime::MAX, None, None).unwrap(), 3);
//! traceset.end(&hooks);
//! assert_eq!(*cpus.lock().unwrap(), vec![1, 0]);
//!
//! // Step back over the last two events
//! assert_eq!(traceset.seek_n_backward(2, None).unwrap(), 2);
//! assert_eq!(traceset.current_time(), Some(TraceTime::from_nanos(15)));
//! ```

pub mod attribute;
pub mod config;
pub mod error;
pub mod filter;
pub mod hooks;
pub mod source;
pub mod state;
pub mod time;
pub mod traceset;

// Re-export main types
pub use attribute::AttributeBag;
pub use config::EngineConfig;
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, Result, TraceError};
pub use filter::{Filter, FilterContext, FilterTree, LogicalOp};
pub use hooks::{Hook, HookData, HookRegistry, HookTable, Priority};
pub use source::{CursorPosition, Event, EventCursor, TraceDecoder, TraceHandle};
pub use state::{ExecutionMode, ProcessState, ProcessStatus, TraceState};
pub use time::{TimeInterval, TraceTime};
pub use traceset::{EventContext, PhaseHooks, Trace, Traceset, TracesetPosition};
