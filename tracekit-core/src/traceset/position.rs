//! Positions in the merged event stream

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::{CursorPosition, EventCursor, TraceHandle};
use crate::time::TraceTime;

/// An immutable, totally ordered marker in a traceset's merged stream
///
/// Ordering and equality use the cursor position only: timestamp, then
/// trace, tracefile and intra-tracefile location. The cpu is carried along
/// for display. A position stays meaningful across cursor advances and can
/// be handed back to [`Traceset::seek_to_position`](crate::Traceset::seek_to_position).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TracesetPosition {
    raw: CursorPosition,
    cpu: Option<u32>,
}

impl TracesetPosition {
    pub const END: TracesetPosition = TracesetPosition {
        raw: CursorPosition::END,
        cpu: None,
    };

    pub fn new(raw: CursorPosition, cpu: Option<u32>) -> Self {
        Self { raw, cpu }
    }

    /// Snapshot where `cursor` currently stands
    pub fn of(cursor: &dyn EventCursor) -> Self {
        match cursor.read_current_event() {
            Some(event) => Self::new(event.position(), Some(event.cpu())),
            None => Self::END,
        }
    }

    pub fn timestamp(&self) -> TraceTime {
        self.raw.timestamp
    }

    pub fn trace(&self) -> Option<TraceHandle> {
        (!self.is_end()).then_some(self.raw.trace)
    }

    pub fn cpu(&self) -> Option<u32> {
        self.cpu
    }

    pub fn raw(&self) -> &CursorPosition {
        &self.raw
    }

    pub fn is_end(&self) -> bool {
        self.raw.is_end()
    }
}

impl PartialEq for TracesetPosition {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for TracesetPosition {}

impl PartialOrd for TracesetPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TracesetPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for TracesetPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cpu {
            Some(cpu) => write!(f, "{} (cpu {})", self.raw, cpu),
            None => write!(f, "{}", self.raw),
        }
    }
}
