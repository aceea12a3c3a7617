//! Trace membership handle

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::attribute::AttributeBag;
use crate::error::Result;
use crate::hooks::HookTable;
use crate::source::{TraceDecoder, TraceHandle};
use crate::state::TraceState;
use crate::time::TimeInterval;

use super::EventContext;

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// One trace taking part in one or more tracesets
///
/// Shared as `Arc<Trace>`. The membership count tracks how many tracesets
/// list the trace; the value itself is freed once the last `Arc` goes.
/// Event type ids are per trace, so per-type hooks live here rather than on
/// the traceset.
pub struct Trace {
    handle: TraceHandle,
    name: String,
    time_span: TimeInterval,
    memberships: AtomicUsize,
    attributes: RwLock<AttributeBag>,
    state: RwLock<TraceState>,
    event_by_id: RwLock<HookTable<EventContext>>,
}

impl Trace {
    pub fn new(handle: TraceHandle, name: impl Into<String>, time_span: TimeInterval) -> Self {
        Self {
            handle,
            name: name.into(),
            time_span,
            memberships: AtomicUsize::new(0),
            attributes: RwLock::new(AttributeBag::new()),
            state: RwLock::new(TraceState::new()),
            event_by_id: RwLock::new(HookTable::new()),
        }
    }

    /// Describe an already-open decoder trace
    pub fn from_decoder(decoder: &dyn TraceDecoder, handle: TraceHandle) -> Result<Self> {
        Ok(Self::new(
            handle,
            decoder.trace_name(handle)?,
            decoder.time_span(handle)?,
        ))
    }

    pub fn handle(&self) -> TraceHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_span(&self) -> TimeInterval {
        self.time_span
    }

    /// Take a membership reference; returns the new count
    pub fn acquire(&self) -> usize {
        self.memberships.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop a membership reference; returns the new count
    ///
    /// # Panics
    ///
    /// If no reference is held.
    pub fn release(&self) -> usize {
        match self
            .memberships
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => panic!("releasing {} with no membership held", self.handle),
        }
    }

    pub fn ref_count(&self) -> usize {
        self.memberships.load(Ordering::Acquire)
    }

    pub fn attributes(&self) -> RwLockReadGuard<'_, AttributeBag> {
        read(&self.attributes)
    }

    pub fn attributes_mut(&self) -> RwLockWriteGuard<'_, AttributeBag> {
        write(&self.attributes)
    }

    pub fn state(&self) -> RwLockReadGuard<'_, TraceState> {
        read(&self.state)
    }

    pub fn state_mut(&self) -> RwLockWriteGuard<'_, TraceState> {
        write(&self.state)
    }

    /// Per-event-type hooks; must not be locked for writing from inside a hook
    pub fn event_by_id(&self) -> RwLockReadGuard<'_, HookTable<EventContext>> {
        read(&self.event_by_id)
    }

    pub fn event_by_id_mut(&self) -> RwLockWriteGuard<'_, HookTable<EventContext>> {
        write(&self.event_by_id)
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("time_span", &self.time_span)
            .field("memberships", &self.ref_count())
            .finish()
    }
}
