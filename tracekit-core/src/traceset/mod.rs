//! Tracesets and the replay loop
//!
//! A [`Traceset`] groups traces read through one [`TraceDecoder`] and walks
//! their events in merged time order. Drivers wrap replay in
//! [`begin`](Traceset::begin) / [`middle`](Traceset::middle) /
//! [`end`](Traceset::end) and may reposition between `middle` calls with
//! the seek operations.
//!
//! # Example
//!
//! ```rust
//! use tracekit_core::hooks::Priority;
//! use tracekit_core::source::{MemoryDecoder, MemoryTraceBuilder};
//! use tracekit_core::{EventContext, PhaseHooks, TraceTime, Traceset};
//! use serde_json::json;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let mut builder = MemoryTraceBuilder::new("demo").tracefile("cpu_0", 0);
//! for t in 1..=5 {
//!     builder = builder.event(0, TraceTime::from_nanos(t), "tick", json!({}));
//! }
//! let mut decoder = MemoryDecoder::new();
//! let handle = decoder.insert(builder.build().unwrap()).unwrap();
//!
//! let mut traceset = Traceset::new(Box::new(decoder));
//! traceset.attach(handle).unwrap();
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! let mut hooks = PhaseHooks::default();
//! hooks.event.add_fn(Priority::DEFAULT, move |_, _ctx: &EventContext| {
//!     counter.fetch_add(1, Ordering::Relaxed);
//!     false
//! });
//!
//! traceset.begin(&hooks).unwrap();
//! let processed = traceset.middle(TraceTime::MAX, None, None).unwrap();
//! traceset.end(&hooks);
//!
//! assert_eq!(processed, 5);
//! assert_eq!(seen.load(Ordering::Relaxed), 5);
//! ```

mod position;
mod replay;
mod seek;
mod trace;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::attribute::AttributeBag;
use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::filter::Filter;
use crate::hooks::{HookRegistry, HookTable};
use crate::source::{Event, EventCursor, TraceDecoder, TraceHandle};
use crate::state::ProcessState;
use crate::time::{TimeInterval, TraceTime};

pub use position::TracesetPosition;
pub use trace::Trace;

/// What an event hook receives
///
/// A snapshot: the event, the trace it belongs to, where it sits in the
/// merged stream and the process running on its cpu when it was read.
/// Nothing in it changes when the cursor moves on.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: Event,
    pub trace: Arc<Trace>,
    pub position: TracesetPosition,
    pub process: Option<ProcessState>,
}

/// Hooks handed to [`Traceset::begin`] or [`Traceset::end`]
///
/// `traceset` runs once and `trace` once per trace: before installation in
/// `begin`, after removal in `end`. `event` and `event_by_id` are installed
/// by `begin` and removed by `end`, so the same registries must be passed
/// to both.
#[derive(Clone, Default)]
pub struct PhaseHooks {
    pub traceset: HookRegistry<Traceset>,
    pub trace: HookRegistry<Trace>,
    pub event: HookRegistry<EventContext>,
    pub event_by_id: HookTable<EventContext>,
}

/// An ordered set of traces replayed together
pub struct Traceset {
    name: String,
    decoder: Box<dyn TraceDecoder>,
    traces: Vec<Arc<Trace>>,
    cursor: Option<Box<dyn EventCursor>>,
    event_hooks: HookRegistry<EventContext>,
    filter: Option<Filter>,
    attributes: AttributeBag,
    config: EngineConfig,
}

impl Traceset {
    pub fn new(decoder: Box<dyn TraceDecoder>) -> Self {
        Self::build(decoder, EngineConfig::default())
    }

    /// Build with a custom configuration, rejecting values the seek
    /// estimator cannot make progress with
    pub fn with_config(decoder: Box<dyn TraceDecoder>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(decoder, config))
    }

    fn build(decoder: Box<dyn TraceDecoder>, config: EngineConfig) -> Self {
        Self {
            name: String::new(),
            decoder,
            traces: Vec::new(),
            cursor: None,
            event_hooks: HookRegistry::new(),
            filter: None,
            attributes: AttributeBag::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn decoder(&self) -> &dyn TraceDecoder {
        self.decoder.as_ref()
    }

    // ───────────────────────────────────────────────────────────────────────
    // Membership
    // ───────────────────────────────────────────────────────────────────────

    /// Open a trace through the decoder and append it
    pub fn open_trace<P: AsRef<Path>>(&mut self, path: P) -> Result<Arc<Trace>> {
        let handle = self.decoder.open(path.as_ref())?;
        self.attach(handle)
    }

    /// Append a trace the decoder already has open
    pub fn attach(&mut self, handle: TraceHandle) -> Result<Arc<Trace>> {
        let trace = Arc::new(Trace::from_decoder(self.decoder.as_ref(), handle)?);
        self.add(Arc::clone(&trace));
        Ok(trace)
    }

    /// Append `trace` and take a membership reference on it
    pub fn add(&mut self, trace: Arc<Trace>) {
        let refs = trace.acquire();
        debug!(
            traceset = %self.name,
            trace = %trace.name(),
            handle = %trace.handle(),
            refs,
            "Added trace"
        );
        self.traces.push(trace);
        self.invalidate_cursor();
    }

    /// Remove the trace at `index`
    ///
    /// The membership reference is dropped and the decoder closes the trace
    /// whether or not other tracesets still list it.
    pub fn remove(&mut self, index: usize) -> Result<Arc<Trace>> {
        if index >= self.traces.len() {
            return Err(TraceError::TraceIndexOutOfRange {
                index,
                count: self.traces.len(),
            });
        }
        let trace = self.traces.remove(index);
        let refs = trace.release();
        if let Err(e) = self.decoder.close(trace.handle()) {
            warn!(handle = %trace.handle(), error = %e, "Decoder failed to close trace");
        }
        debug!(traceset = %self.name, trace = %trace.name(), refs, "Removed trace");
        self.invalidate_cursor();
        Ok(trace)
    }

    pub fn number(&self) -> usize {
        self.traces.len()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Trace>> {
        self.traces.get(index)
    }

    pub fn traces(&self) -> &[Arc<Trace>] {
        &self.traces
    }

    pub fn find(&self, handle: TraceHandle) -> Option<&Arc<Trace>> {
        self.traces.iter().find(|t| t.handle() == handle)
    }

    // ───────────────────────────────────────────────────────────────────────
    // Hooks, filter, attributes
    // ───────────────────────────────────────────────────────────────────────

    /// Hooks run for every admitted event
    pub fn event_hooks(&self) -> &HookRegistry<EventContext> {
        &self.event_hooks
    }

    pub fn event_hooks_mut(&mut self) -> &mut HookRegistry<EventContext> {
        &mut self.event_hooks
    }

    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    /// Events the filter rejects are consumed without being dispatched
    pub fn set_filter(&mut self, filter: Option<Filter>) {
        self.filter = filter;
    }

    pub fn attributes(&self) -> &AttributeBag {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeBag {
        &mut self.attributes
    }

    /// Run `hooks.traceset`, install the event hooks and run `hooks.trace`
    /// for each trace
    pub fn add_hooks(&mut self, hooks: &PhaseHooks) {
        hooks.traceset.call(self);
        for trace in &self.traces {
            trace.event_by_id_mut().add_table(&hooks.event_by_id);
            hooks.trace.call(trace);
        }
        self.event_hooks.add_list(&hooks.event);
    }

    /// Mirror of [`add_hooks`](Self::add_hooks): traces in reverse order
    /// first, then the traceset
    pub fn remove_hooks(&mut self, hooks: &PhaseHooks) {
        self.event_hooks.remove_list(&hooks.event);
        for trace in self.traces.iter().rev() {
            hooks.trace.call(trace);
            trace.event_by_id_mut().remove_table(&hooks.event_by_id);
        }
        hooks.traceset.call(self);
    }

    // ───────────────────────────────────────────────────────────────────────
    // Time and positions
    // ───────────────────────────────────────────────────────────────────────

    /// Earliest start to latest end over all traces; `[0, 1]` when empty
    pub fn time_span(&self) -> TimeInterval {
        let mut spans = self.traces.iter().map(|t| t.time_span());
        let Some(first) = spans.next() else {
            return TimeInterval::new(TraceTime::ZERO, TraceTime::from_nanos(1));
        };
        spans.fold(first, |acc, s| {
            TimeInterval::new(acc.start.min(s.start), acc.end.max(s.end))
        })
    }

    /// Timestamp of the event under the cursor
    pub fn current_time(&self) -> Option<TraceTime> {
        self.cursor
            .as_deref()
            .map(|c| c.position())
            .filter(|p| !p.is_end())
            .map(|p| p.timestamp)
    }

    /// Position of the cursor, `None` before the cursor exists
    pub fn current_position(&self) -> Option<TracesetPosition> {
        self.cursor.as_deref().map(TracesetPosition::of)
    }

    /// Position of the first event of the traceset
    pub fn begin_position(&self) -> Result<TracesetPosition> {
        let cursor = self.decoder.cursor(&self.handles())?;
        Ok(TracesetPosition::of(cursor.as_ref()))
    }

    /// Position of the first event at or after `time`
    pub fn position_at_time(&self, time: TraceTime) -> Result<TracesetPosition> {
        let mut cursor = self.decoder.cursor(&self.handles())?;
        cursor
            .seek_to_time(time)
            .map_err(|e| TraceError::SeekFailed {
                time,
                reason: e.to_string(),
            })?;
        Ok(TracesetPosition::of(cursor.as_ref()))
    }

    fn handles(&self) -> Vec<TraceHandle> {
        self.traces.iter().map(|t| t.handle()).collect()
    }

    /// The merged cursor, created at the first event if missing
    fn cursor_mut(&mut self) -> Result<&mut (dyn EventCursor + 'static)> {
        if self.cursor.is_none() {
            let cursor = self.decoder.cursor(&self.handles())?;
            debug!(
                traceset = %self.name,
                traces = self.traces.len(),
                decoder = self.decoder.name(),
                "Created merged cursor"
            );
            self.cursor = Some(cursor);
        }
        self.cursor
            .as_deref_mut()
            .ok_or_else(|| TraceError::InternalError {
                reason: "merged cursor missing after creation".to_string(),
            })
    }

    fn invalidate_cursor(&mut self) {
        if self.cursor.take().is_some() {
            debug!(traceset = %self.name, "Membership changed; cursor reset");
        }
    }
}

impl std::fmt::Debug for Traceset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Traceset")
            .field("name", &self.name)
            .field("decoder", &self.decoder.name())
            .field("traces", &self.traces)
            .field("event_hooks", &self.event_hooks.len())
            .field("filter", &self.filter)
            .field("position", &self.current_position())
            .finish()
    }
}

/// Step the merged cursor, reporting decoder failures as cursor errors
fn advance(cursor: &mut dyn EventCursor) -> Result<bool> {
    cursor.advance().map_err(|e| TraceError::CursorError {
        reason: format!("advancing from {}: {}", cursor.position(), e),
    })
}
