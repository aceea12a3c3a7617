//! Replay loop: begin / middle / end

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Result, TraceError};
use crate::filter::FilterContext;
use crate::hooks::HookRegistry;
use crate::time::TraceTime;

use super::{advance, EventContext, PhaseHooks, Traceset, TracesetPosition};

impl Traceset {
    /// Install `hooks` and make sure the merged cursor exists
    ///
    /// An existing cursor is kept where it is, so replay resumes from the
    /// last position.
    pub fn begin(&mut self, hooks: &PhaseHooks) -> Result<()> {
        debug!(
            traceset = %self.name,
            traces = self.traces.len(),
            event_hooks = hooks.event.len(),
            "Replay begin"
        );
        self.add_hooks(hooks);
        self.cursor_mut()?;
        Ok(())
    }

    /// Replay events until a bound is reached; returns how many were read
    ///
    /// Stops at end of stream, at the first event whose timestamp is not
    /// before `end_time`, after `max_events` events, at `stop` (which is not
    /// read), or right after an event for which a hook returned `true`.
    /// Events the filter rejects count as read.
    pub fn middle(
        &mut self,
        end_time: TraceTime,
        max_events: Option<usize>,
        stop: Option<&TracesetPosition>,
    ) -> Result<usize> {
        self.cursor_mut()?;
        let Traceset {
            name,
            traces,
            cursor,
            event_hooks,
            filter,
            ..
        } = self;
        let cursor = cursor
            .as_deref_mut()
            .ok_or_else(|| TraceError::InternalError {
                reason: "merged cursor missing in middle()".to_string(),
            })?;

        let mut processed = 0usize;
        loop {
            if max_events.is_some_and(|max| processed >= max) {
                break;
            }
            let Some(event) = cursor.read_current_event() else {
                break;
            };
            if event.timestamp >= end_time {
                break;
            }
            let position = TracesetPosition::new(event.position(), Some(event.cpu()));
            if stop == Some(&position) {
                break;
            }
            processed += 1;

            let Some(owner) = traces.iter().find(|t| t.handle() == event.trace) else {
                warn!(handle = %event.trace, "Event from a trace outside the traceset");
                advance(cursor)?;
                continue;
            };
            let process = owner.state().running_process(event.cpu()).cloned();

            let admitted = filter.as_ref().map_or(true, |f| {
                f.evaluate(&FilterContext {
                    traceset: Some(name.as_str()),
                    trace: Some(owner.as_ref()),
                    tracefile: Some(event.tracefile.as_ref()),
                    event: Some(&event),
                    state: process.as_ref(),
                })
            });

            let halt = if admitted {
                let context = EventContext {
                    event,
                    trace: Arc::clone(owner),
                    position,
                    process,
                };
                let by_id = owner.event_by_id();
                HookRegistry::call_merge(
                    Some(&*event_hooks),
                    &context,
                    by_id.get(context.event.type_id as usize),
                    &context,
                )
            } else {
                false
            };

            advance(cursor)?;
            if halt {
                trace!(traceset = %name, processed, "Hook requested halt");
                break;
            }
        }
        Ok(processed)
    }

    /// Remove `hooks`, running the after-hooks in reverse order
    pub fn end(&mut self, hooks: &PhaseHooks) {
        self.remove_hooks(hooks);
        debug!(traceset = %self.name, "Replay end");
    }

    /// Replay `[start, end)` in chunks of the configured event budget
    ///
    /// Convenience for batch drivers: begin, seek to `start`, call `middle`
    /// until it comes back short, end. Returns the number of events read.
    pub fn process_time_range(
        &mut self,
        hooks: &PhaseHooks,
        start: TraceTime,
        end: TraceTime,
    ) -> Result<usize> {
        self.begin(hooks)?;
        let result = self.replay_chunks(start, end);
        self.end(hooks);
        result
    }

    fn replay_chunks(&mut self, start: TraceTime, end: TraceTime) -> Result<usize> {
        self.seek_by_time(start)?;
        let chunk = self.config.replay_chunk_events;
        let mut total = 0;
        loop {
            let read = self.middle(end, Some(chunk), None)?;
            total += read;
            trace!(traceset = %self.name, read, total, "Replayed chunk");
            if read < chunk {
                break;
            }
        }
        Ok(total)
    }
}
