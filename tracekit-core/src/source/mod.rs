//! Trace decoder interface
//!
//! The engine never parses trace files itself. A [`TraceDecoder`] opens
//! traces and hands out an [`EventCursor`] that walks the merged,
//! time-ordered event stream of a set of traces. [`MemoryDecoder`] is the
//! bundled implementation, backed by in-memory traces or JSON documents.
//!
//! # Example
//!
//! ```rust
//! use tracekit_core::source::{MemoryDecoder, MemoryTraceBuilder, TraceDecoder};
//! use tracekit_core::TraceTime;
//! use serde_json::json;
//!
//! let trace = MemoryTraceBuilder::new("demo")
//!     .tracefile("cpu_0", 0)
//!     .event(0, TraceTime::from_nanos(10), "tick", json!({}))
//!     .event(0, TraceTime::from_nanos(20), "tick", json!({}))
//!     .build()
//!     .unwrap();
//!
//! let mut decoder = MemoryDecoder::new();
//! let handle = decoder.insert(trace).unwrap();
//! let mut cursor = decoder.cursor(&[handle]).unwrap();
//!
//! let first = cursor.read_current_event().unwrap();
//! assert_eq!(first.timestamp, TraceTime::from_nanos(10));
//! assert!(cursor.advance().unwrap());
//! assert!(!cursor.advance().unwrap());
//! ```

mod layout;
mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::time::{TimeInterval, TraceTime};

pub use layout::{EventLayout, FieldCatalog, FieldKind, FieldLayout, ResolvedField, ScalarKind};
pub use memory::{MemoryCursor, MemoryDecoder, MemoryTrace, MemoryTraceBuilder};

/// Decoder-assigned identity of an open trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceHandle(pub u32);

impl fmt::Display for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace#{}", self.0)
    }
}

/// One per-cpu stream of a trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracefileInfo {
    pub id: u32,
    pub name: String,
    pub cpu: u32,
}

/// Location of an event in the merged stream
///
/// Field order is the comparison order: timestamp first, then trace,
/// tracefile and the intra-tracefile block/offset. Events sharing a
/// timestamp across traces are therefore ordered by trace handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CursorPosition {
    pub timestamp: TraceTime,
    pub trace: TraceHandle,
    pub tracefile: u32,
    pub block: u32,
    pub offset: u32,
}

impl CursorPosition {
    /// Past the last event; sorts after every real position
    pub const END: CursorPosition = CursorPosition {
        timestamp: TraceTime::MAX,
        trace: TraceHandle(u32::MAX),
        tracefile: u32::MAX,
        block: u32::MAX,
        offset: u32::MAX,
    };

    pub fn is_end(&self) -> bool {
        *self == Self::END
    }
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            return f.write_str("<end>");
        }
        write!(
            f,
            "{}@{}/{}:{}.{}",
            self.timestamp, self.trace, self.tracefile, self.block, self.offset
        )
    }
}

/// A decoded event
///
/// Cheap to clone: the tracefile description, name and payload are shared.
/// Field values live in `payload` at offsets given by the event's
/// [`EventLayout`], little-endian; string fields are a `(u32 start, u32 len)`
/// slot pointing into the payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub trace: TraceHandle,
    pub tracefile: Arc<TracefileInfo>,
    pub type_id: u32,
    pub name: Arc<str>,
    pub timestamp: TraceTime,
    pub cycles: u64,
    pub block: u32,
    pub offset: u32,
    pub payload: Arc<[u8]>,
}

impl Event {
    pub fn position(&self) -> CursorPosition {
        CursorPosition {
            timestamp: self.timestamp,
            trace: self.trace,
            tracefile: self.tracefile.id,
            block: self.block,
            offset: self.offset,
        }
    }

    pub fn cpu(&self) -> u32 {
        self.tracefile.cpu
    }

    fn bytes<const N: usize>(&self, offset: u32) -> Option<[u8; N]> {
        let start = offset as usize;
        self.payload.get(start..start + N)?.try_into().ok()
    }

    pub fn read_u16(&self, offset: u32) -> Option<u16> {
        self.bytes(offset).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, offset: u32) -> Option<u32> {
        self.bytes(offset).map(u32::from_le_bytes)
    }

    pub fn read_u64(&self, offset: u32) -> Option<u64> {
        self.bytes(offset).map(u64::from_le_bytes)
    }

    pub fn read_f64(&self, offset: u32) -> Option<f64> {
        self.bytes(offset).map(f64::from_le_bytes)
    }

    /// Follow the string slot at `offset`
    pub fn read_str(&self, offset: u32) -> Option<&str> {
        let start = self.read_u32(offset)? as usize;
        let len = self.read_u32(offset + 4)? as usize;
        let bytes = self.payload.get(start..start.checked_add(len)?)?;
        std::str::from_utf8(bytes).ok()
    }
}

/// Opens traces and creates cursors over them
pub trait TraceDecoder: Send {
    /// Open the trace stored at `path`
    fn open(&mut self, path: &Path) -> Result<TraceHandle>;

    /// Forget a trace; cursors created earlier keep their own snapshot
    fn close(&mut self, handle: TraceHandle) -> Result<()>;

    fn trace_name(&self, handle: TraceHandle) -> Result<String>;

    /// First and last timestamp of the trace
    fn time_span(&self, handle: TraceHandle) -> Result<TimeInterval>;

    /// Event layouts of every open trace, keyed by event name
    fn catalog(&self) -> &FieldCatalog;

    /// A cursor over the merged stream of `traces`, positioned at the first
    /// event
    fn cursor(&self, traces: &[TraceHandle]) -> Result<Box<dyn EventCursor>>;

    /// Decoder name (for logging)
    fn name(&self) -> &'static str;
}

/// Sequential reader over a merged event stream
pub trait EventCursor: Send {
    /// The event under the cursor, `None` at end of stream
    fn read_current_event(&self) -> Option<Event>;

    /// Step past the current event; returns whether an event is now current
    fn advance(&mut self) -> Result<bool>;

    /// Move to the first event at or after `time`
    fn seek_to_time(&mut self, time: TraceTime) -> Result<()>;

    fn seek_to_begin(&mut self) -> Result<()>;

    /// Position of the current event, [`CursorPosition::END`] past the end
    fn position(&self) -> CursorPosition;

    /// Move to the first event at or after `position`
    fn seek_to_position(&mut self, position: &CursorPosition) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with(payload: Vec<u8>) -> Event {
        Event {
            trace: TraceHandle(0),
            tracefile: Arc::new(TracefileInfo {
                id: 0,
                name: "cpu_0".to_string(),
                cpu: 0,
            }),
            type_id: 0,
            name: Arc::from("test"),
            timestamp: TraceTime::ZERO,
            cycles: 0,
            block: 0,
            offset: 0,
            payload: payload.into(),
        }
    }

    #[test]
    fn test_position_order_breaks_ties_by_trace() {
        let a = CursorPosition {
            timestamp: TraceTime::from_nanos(5),
            trace: TraceHandle(2),
            tracefile: 0,
            block: 0,
            offset: 9,
        };
        let b = CursorPosition {
            trace: TraceHandle(3),
            offset: 0,
            ..a
        };
        assert!(a < b);
        assert!(b < CursorPosition::END);
        assert!(CursorPosition::END.is_end());
    }

    #[test]
    fn test_payload_readers() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&7u16.to_le_bytes());
        payload.extend_from_slice(&10u32.to_le_bytes());
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(b"hi");
        let event = event_with(payload);

        assert_eq!(event.read_u16(0), Some(7));
        assert_eq!(event.read_str(2), Some("hi"));
        assert_eq!(event.read_u64(8), None);
    }
}
