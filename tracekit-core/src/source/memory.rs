//! In-memory trace decoder
//!
//! Traces are either assembled with [`MemoryTraceBuilder`] or loaded from a
//! JSON document:
//!
//! ```json
//! {
//!   "name": "boot",
//!   "events": [{"name": "sched_switch", "fields": [{"name": "next_pid", "type": "u32"}]}],
//!   "tracefiles": [
//!     {"name": "cpu_0", "cpu": 0, "events": [
//!       {"timestamp": 1500, "name": "sched_switch", "fields": {"next_pid": 42}}
//!     ]}
//!   ]
//! }
//! ```
//!
//! Timestamps are nanoseconds. Events of a tracefile are sorted by timestamp
//! on build, keeping the given order among equal timestamps.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    CursorPosition, Event, EventCursor, EventLayout, FieldCatalog, TraceDecoder, TraceHandle,
    TracefileInfo,
};
use crate::error::{Result, TraceError};
use crate::time::{TimeInterval, TraceTime};

/// Events per block in synthesized cursor positions
const EVENTS_PER_BLOCK: usize = 64;

#[derive(Debug)]
struct StoredEvent {
    timestamp: TraceTime,
    type_id: u32,
    payload: Arc<[u8]>,
}

#[derive(Debug)]
struct MemoryTracefile {
    info: Arc<TracefileInfo>,
    events: Vec<StoredEvent>,
}

/// A fully decoded trace held in memory
#[derive(Debug)]
pub struct MemoryTrace {
    name: String,
    layouts: Vec<EventLayout>,
    event_names: Vec<Arc<str>>,
    tracefiles: Vec<MemoryTracefile>,
}

impl MemoryTrace {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layouts indexed by event type id
    pub fn layouts(&self) -> &[EventLayout] {
        &self.layouts
    }

    pub fn tracefiles(&self) -> impl Iterator<Item = &TracefileInfo> {
        self.tracefiles.iter().map(|f| f.info.as_ref())
    }

    pub fn event_count(&self) -> usize {
        self.tracefiles.iter().map(|f| f.events.len()).sum()
    }

    /// First and last timestamp; `[0, 0]` for a trace without events
    pub fn time_span(&self) -> TimeInterval {
        let mut bounds: Option<(TraceTime, TraceTime)> = None;
        for file in &self.tracefiles {
            if let (Some(first), Some(last)) = (file.events.first(), file.events.last()) {
                bounds = Some(match bounds {
                    None => (first.timestamp, last.timestamp),
                    Some((lo, hi)) => (lo.min(first.timestamp), hi.max(last.timestamp)),
                });
            }
        }
        let (start, end) = bounds.unwrap_or_default();
        TimeInterval::new(start, end)
    }

    /// Parse a JSON trace document
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: TraceDocument = serde_json::from_str(json)?;
        let mut builder = MemoryTraceBuilder::new(doc.name.unwrap_or_default());
        for layout in doc.events {
            builder = builder.layout(layout);
        }
        for (index, file) in doc.tracefiles.into_iter().enumerate() {
            builder = builder.tracefile(file.name, file.cpu);
            for event in file.events {
                builder = builder.event(index, event.timestamp, &event.name, event.fields);
            }
        }
        builder.build()
    }
}

#[derive(Deserialize)]
struct TraceDocument {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    events: Vec<EventLayout>,
    tracefiles: Vec<TracefileDocument>,
}

#[derive(Deserialize)]
struct TracefileDocument {
    name: String,
    #[serde(default)]
    cpu: u32,
    #[serde(default)]
    events: Vec<EventRecord>,
}

#[derive(Deserialize)]
struct EventRecord {
    timestamp: TraceTime,
    name: String,
    #[serde(default)]
    fields: Value,
}

struct PendingEvent {
    tracefile: usize,
    timestamp: TraceTime,
    name: String,
    fields: Value,
}

/// Assembles a [`MemoryTrace`]
///
/// Events naming an undeclared event type get an empty layout; giving such
/// an event field values is an error at [`build`](Self::build).
pub struct MemoryTraceBuilder {
    name: String,
    layouts: Vec<EventLayout>,
    tracefiles: Vec<(String, u32)>,
    events: Vec<PendingEvent>,
}

impl MemoryTraceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layouts: Vec::new(),
            tracefiles: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Declare an event type; its type id is the declaration index
    pub fn layout(mut self, layout: EventLayout) -> Self {
        self.layouts.push(layout);
        self
    }

    /// Declare a tracefile; tracefiles are numbered from zero
    pub fn tracefile(mut self, name: impl Into<String>, cpu: u32) -> Self {
        self.tracefiles.push((name.into(), cpu));
        self
    }

    pub fn event(mut self, tracefile: usize, timestamp: TraceTime, name: &str, fields: Value) -> Self {
        self.events.push(PendingEvent {
            tracefile,
            timestamp,
            name: name.to_string(),
            fields,
        });
        self
    }

    pub fn build(self) -> Result<MemoryTrace> {
        let mut layouts: Vec<EventLayout> = Vec::new();
        for layout in self.layouts {
            layout.validate()?;
            if layouts.iter().any(|l| l.name == layout.name) {
                return Err(TraceError::InvalidLayout {
                    event: layout.name,
                    reason: "declared twice".to_string(),
                });
            }
            layouts.push(layout);
        }

        let mut tracefiles: Vec<MemoryTracefile> = self
            .tracefiles
            .into_iter()
            .enumerate()
            .map(|(id, (name, cpu))| MemoryTracefile {
                info: Arc::new(TracefileInfo {
                    id: id as u32,
                    name,
                    cpu,
                }),
                events: Vec::new(),
            })
            .collect();

        for pending in self.events {
            let type_id = match layouts.iter().position(|l| l.name == pending.name) {
                Some(id) => id,
                None => {
                    let has_values = match &pending.fields {
                        Value::Null => false,
                        Value::Object(map) => !map.is_empty(),
                        _ => true,
                    };
                    if has_values {
                        return Err(TraceError::InvalidLayout {
                            event: pending.name,
                            reason: "field values given for an undeclared event type".to_string(),
                        });
                    }
                    layouts.push(EventLayout::new(pending.name.clone()));
                    layouts.len() - 1
                }
            };

            let count = tracefiles.len();
            let file = tracefiles.get_mut(pending.tracefile).ok_or_else(|| {
                TraceError::InvalidLayout {
                    event: pending.name.clone(),
                    reason: format!(
                        "tracefile {} not declared ({} declared)",
                        pending.tracefile, count
                    ),
                }
            })?;
            let payload = layouts[type_id].encode(&pending.fields)?;
            file.events.push(StoredEvent {
                timestamp: pending.timestamp,
                type_id: type_id as u32,
                payload: payload.into(),
            });
        }

        for file in &mut tracefiles {
            file.events.sort_by_key(|e| e.timestamp);
        }

        let event_names = layouts.iter().map(|l| Arc::from(l.name.as_str())).collect();
        Ok(MemoryTrace {
            name: self.name,
            layouts,
            event_names,
            tracefiles,
        })
    }
}

/// [`TraceDecoder`] over in-memory traces
#[derive(Debug, Default)]
pub struct MemoryDecoder {
    traces: BTreeMap<TraceHandle, Arc<MemoryTrace>>,
    next_handle: u32,
    catalog: FieldCatalog,
}

impl MemoryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built trace and return its handle
    ///
    /// Fails when one of its event layouts conflicts with a layout of the
    /// same name from a trace already registered.
    pub fn insert(&mut self, trace: MemoryTrace) -> Result<TraceHandle> {
        let mut catalog = self.catalog.clone();
        for layout in &trace.layouts {
            catalog.insert(layout.clone())?;
        }
        self.catalog = catalog;

        let handle = TraceHandle(self.next_handle);
        self.next_handle += 1;
        debug!(
            handle = %handle,
            name = %trace.name,
            events = trace.event_count(),
            "Registered in-memory trace"
        );
        self.traces.insert(handle, Arc::new(trace));
        Ok(handle)
    }

    pub fn trace(&self, handle: TraceHandle) -> Option<&MemoryTrace> {
        self.traces.get(&handle).map(Arc::as_ref)
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    fn lookup(&self, handle: TraceHandle) -> Result<&Arc<MemoryTrace>> {
        self.traces
            .get(&handle)
            .ok_or(TraceError::UnknownTraceHandle { handle: handle.0 })
    }
}

impl TraceDecoder for MemoryDecoder {
    fn open(&mut self, path: &Path) -> Result<TraceHandle> {
        let failed = |reason: String| TraceError::TraceOpenFailed {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| failed(e.to_string()))?;
        let mut trace = MemoryTrace::from_json(&content).map_err(|e| failed(e.to_string()))?;
        if trace.name.is_empty() {
            trace.name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
        }
        self.insert(trace).map_err(|e| failed(e.to_string()))
    }

    fn close(&mut self, handle: TraceHandle) -> Result<()> {
        if self.traces.remove(&handle).is_none() {
            return Err(TraceError::UnknownTraceHandle { handle: handle.0 });
        }
        debug!(handle = %handle, "Closed in-memory trace");
        Ok(())
    }

    fn trace_name(&self, handle: TraceHandle) -> Result<String> {
        Ok(self.lookup(handle)?.name.clone())
    }

    fn time_span(&self, handle: TraceHandle) -> Result<TimeInterval> {
        Ok(self.lookup(handle)?.time_span())
    }

    fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    fn cursor(&self, traces: &[TraceHandle]) -> Result<Box<dyn EventCursor>> {
        let mut streams = Vec::new();
        for &handle in traces {
            let trace = self.lookup(handle)?;
            for file in 0..trace.tracefiles.len() {
                streams.push(Stream {
                    handle,
                    trace: Arc::clone(trace),
                    file,
                });
            }
        }
        Ok(Box::new(MemoryCursor::new(streams)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct Stream {
    handle: TraceHandle,
    trace: Arc<MemoryTrace>,
    file: usize,
}

impl Stream {
    fn tracefile(&self) -> &MemoryTracefile {
        &self.trace.tracefiles[self.file]
    }

    fn len(&self) -> usize {
        self.tracefile().events.len()
    }

    fn key(&self, index: usize) -> CursorPosition {
        let file = self.tracefile();
        CursorPosition {
            timestamp: file.events[index].timestamp,
            trace: self.handle,
            tracefile: file.info.id,
            block: (index / EVENTS_PER_BLOCK) as u32,
            offset: (index % EVENTS_PER_BLOCK) as u32,
        }
    }

    /// First index whose key is not before `position`
    fn lower_bound(&self, position: &CursorPosition) -> usize {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.key(mid) < *position {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

/// Merged cursor over the tracefiles of several in-memory traces
///
/// A min-heap holds the next event of every tracefile, keyed on its
/// [`CursorPosition`].
pub struct MemoryCursor {
    streams: Vec<Stream>,
    next: Vec<usize>,
    heap: BinaryHeap<Reverse<(CursorPosition, usize)>>,
}

impl MemoryCursor {
    fn new(streams: Vec<Stream>) -> Self {
        let next = vec![0; streams.len()];
        let mut cursor = Self {
            streams,
            next,
            heap: BinaryHeap::new(),
        };
        cursor.refill();
        cursor
    }

    fn refill(&mut self) {
        self.heap.clear();
        for (s, stream) in self.streams.iter().enumerate() {
            let index = self.next[s];
            if index < stream.len() {
                self.heap.push(Reverse((stream.key(index), s)));
            }
        }
    }
}

impl EventCursor for MemoryCursor {
    fn read_current_event(&self) -> Option<Event> {
        let Reverse((position, s)) = *self.heap.peek()?;
        let stream = &self.streams[s];
        let file = stream.tracefile();
        let stored = &file.events[self.next[s]];
        Some(Event {
            trace: stream.handle,
            tracefile: Arc::clone(&file.info),
            type_id: stored.type_id,
            name: Arc::clone(&stream.trace.event_names[stored.type_id as usize]),
            timestamp: stored.timestamp,
            cycles: stored.timestamp.as_nanos(),
            block: position.block,
            offset: position.offset,
            payload: Arc::clone(&stored.payload),
        })
    }

    fn advance(&mut self) -> Result<bool> {
        let Some(Reverse((_, s))) = self.heap.pop() else {
            return Ok(false);
        };
        self.next[s] += 1;
        let index = self.next[s];
        if index < self.streams[s].len() {
            self.heap.push(Reverse((self.streams[s].key(index), s)));
        }
        Ok(!self.heap.is_empty())
    }

    fn seek_to_time(&mut self, time: TraceTime) -> Result<()> {
        for (s, stream) in self.streams.iter().enumerate() {
            self.next[s] = stream
                .tracefile()
                .events
                .partition_point(|e| e.timestamp < time);
        }
        self.refill();
        Ok(())
    }

    fn seek_to_begin(&mut self) -> Result<()> {
        self.next.iter_mut().for_each(|n| *n = 0);
        self.refill();
        Ok(())
    }

    fn position(&self) -> CursorPosition {
        self.heap
            .peek()
            .map_or(CursorPosition::END, |Reverse((position, _))| *position)
    }

    fn seek_to_position(&mut self, position: &CursorPosition) -> Result<()> {
        for (s, stream) in self.streams.iter().enumerate() {
            self.next[s] = if position.is_end() {
                stream.len()
            } else {
                stream.lower_bound(position)
            };
        }
        self.refill();
        Ok(())
    }
}
