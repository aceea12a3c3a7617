//! Seeking the merged cursor
//!
//! Decoders only read forward, so moving back by a number of events is done
//! by estimation: guess how far back in time `n` events start from an
//! average event spacing, seek there by time, count forward to where we
//! started and correct. An undershoot multiplies the spacing estimate by
//! the configured growth factor and tries again.

use tracing::{debug, trace, warn};

use crate::error::{Result, TraceError};
use crate::source::CursorPosition;
use crate::time::TraceTime;

use super::{advance, Traceset, TracesetPosition};

impl Traceset {
    /// Move to the first event at or after `time`
    pub fn seek_by_time(&mut self, time: TraceTime) -> Result<()> {
        self.cursor_mut()?
            .seek_to_time(time)
            .map_err(|e| TraceError::SeekFailed {
                time,
                reason: e.to_string(),
            })
    }

    /// Return to a position obtained from this traceset
    pub fn seek_to_position(&mut self, position: &TracesetPosition) -> Result<()> {
        self.seek_raw(position.raw())
    }

    fn seek_raw(&mut self, position: &CursorPosition) -> Result<()> {
        self.cursor_mut()?
            .seek_to_position(position)
            .map_err(|e| TraceError::PositionSeekFailed {
                position: position.to_string(),
                reason: e.to_string(),
            })
    }

    /// Step over up to `n` events; returns how many were stepped over
    pub fn seek_n_forward(&mut self, n: usize) -> Result<usize> {
        let cursor = self.cursor_mut()?;
        let mut count = 0;
        while count < n && !cursor.position().is_end() {
            advance(cursor)?;
            count += 1;
        }
        Ok(count)
    }

    /// Move back `n` events; returns how many events the cursor moved back
    ///
    /// `ratio_ns` seeds the nanoseconds-per-event estimate (the configured
    /// `seek_back_ratio_ns` when `None`). The result is `n` unless fewer
    /// than `n` events precede the current position, in which case the
    /// cursor ends at the first event of the traceset.
    pub fn seek_n_backward(&mut self, n: usize, ratio_ns: Option<f64>) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        let configured = self.config.seek_back_ratio_ns;
        let mut ratio = match ratio_ns {
            Some(r) if r.is_finite() && r > 0.0 => r,
            Some(r) => {
                warn!(ratio = r, fallback = configured, "Ignoring unusable seek ratio");
                configured
            }
            None => configured,
        };
        let growth = f64::from(self.config.seek_back_growth);
        let begin = *self.begin_position()?.raw();

        let initial = self.cursor_mut()?.position();
        if initial <= begin {
            return Ok(0);
        }
        let initial_time = if initial.is_end() {
            self.time_span().end + 1
        } else {
            initial.timestamp
        };

        let mut attempts = 0u32;
        let mut previous_target = None;
        loop {
            attempts += 1;
            let distance = (n as f64 * ratio.ceil()).min(u64::MAX as f64);
            let distance = if distance.is_finite() && distance > 0.0 {
                distance as u64
            } else {
                0
            };
            let target = initial_time.saturating_sub(distance);
            let stalled = target >= initial_time || previous_target == Some(target);
            previous_target = Some(target);

            let cursor = self.cursor_mut()?;
            if stalled {
                // the estimate no longer reaches further back: count from the start
                warn!(ratio, target = %target, "Backward seek estimate stalled");
                cursor.seek_to_begin().map_err(|e| TraceError::SeekFailed {
                    time: TraceTime::ZERO,
                    reason: e.to_string(),
                })?;
            } else {
                cursor
                    .seek_to_time(target)
                    .map_err(|e| TraceError::SeekFailed {
                        time: target,
                        reason: e.to_string(),
                    })?;
            }
            let candidate = cursor.position();
            let clamped = candidate <= begin;

            let mut count = 0usize;
            while cursor.position() < initial {
                advance(cursor)?;
                count += 1;
            }
            trace!(
                attempt = attempts,
                ratio,
                target = %target,
                counted = count,
                wanted = n,
                "Backward seek estimate"
            );

            if count >= n {
                self.seek_raw(&candidate)?;
                let skipped = self.seek_n_forward(count - n)?;
                debug_assert_eq!(skipped, count - n);
                debug!(n, attempts, "Backward seek landed");
                return Ok(n);
            }
            if clamped {
                self.cursor_mut()?
                    .seek_to_begin()
                    .map_err(|e| TraceError::SeekFailed {
                        time: TraceTime::ZERO,
                        reason: e.to_string(),
                    })?;
                warn!(
                    wanted = n,
                    available = count,
                    "Backward seek clamped at start of traceset"
                );
                return Ok(count);
            }
            ratio *= growth;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryDecoder, MemoryTraceBuilder};
    use serde_json::json;

    /// Two cpus with uneven density: a dense burst then sparse events
    fn uneven() -> Traceset {
        let mut builder = MemoryTraceBuilder::new("uneven")
            .tracefile("cpu_0", 0)
            .tracefile("cpu_1", 1);
        for i in 0..200u64 {
            builder = builder.event((i % 2) as usize, TraceTime::from_nanos(1_000 + i), "burst", json!({}));
        }
        for i in 0..50u64 {
            builder = builder.event(0, TraceTime::from_nanos(1_000_000 * (i + 1)), "slow", json!({}));
        }
        // simultaneous events on both cpus
        for cpu in 0..2 {
            builder = builder.event(cpu, TraceTime::from_nanos(90_000_000), "sync", json!({}));
        }
        let mut decoder = MemoryDecoder::new();
        let handle = decoder.insert(builder.build().unwrap()).unwrap();
        let mut traceset = Traceset::new(Box::new(decoder));
        traceset.attach(handle).unwrap();
        traceset
    }

    fn position(traceset: &Traceset) -> TracesetPosition {
        traceset.current_position().unwrap()
    }

    #[test]
    fn test_forward_stops_at_end() {
        let mut traceset = uneven();
        assert_eq!(traceset.seek_n_forward(250).unwrap(), 250);
        assert_eq!(traceset.seek_n_forward(10).unwrap(), 2);
        assert!(position(&traceset).is_end());
        assert_eq!(traceset.seek_n_forward(1).unwrap(), 0);
    }

    #[test]
    fn test_backward_round_trip_for_any_ratio() {
        for ratio in [0.001, 1.0, 1000.0, 1e12] {
            for (start, k) in [(0, 5), (190, 30), (230, 22), (240, 12), (0, 252)] {
                let mut traceset = uneven();
                traceset.seek_n_forward(start).unwrap();
                let origin = position(&traceset);

                let moved = traceset.seek_n_forward(k).unwrap();
                assert_eq!(traceset.seek_n_backward(moved, Some(ratio)).unwrap(), moved);
                assert_eq!(position(&traceset), origin, "ratio {} start {} k {}", ratio, start, k);
            }
        }
    }

    #[test]
    fn test_backward_clamps_at_begin() {
        let mut traceset = uneven();
        traceset.seek_n_forward(3).unwrap();
        assert_eq!(traceset.seek_n_backward(10, None).unwrap(), 3);
        assert_eq!(position(&traceset), traceset.begin_position().unwrap());

        assert_eq!(traceset.seek_n_backward(1, None).unwrap(), 0);
        assert_eq!(traceset.seek_n_backward(0, None).unwrap(), 0);
    }

    #[test]
    fn test_backward_from_end() {
        let mut traceset = uneven();
        traceset.seek_n_forward(usize::MAX).unwrap();
        assert_eq!(traceset.seek_n_backward(2, Some(1.0)).unwrap(), 2);
        let p = position(&traceset);
        assert_eq!(p.timestamp(), TraceTime::from_nanos(90_000_000));
        assert_eq!(p.cpu(), Some(0));
    }

    #[test]
    fn test_seek_by_time_and_position() {
        let mut traceset = uneven();
        traceset.seek_by_time(TraceTime::from_nanos(2_500_000)).unwrap();
        let p = position(&traceset);
        assert_eq!(p.timestamp(), TraceTime::from_nanos(3_000_000));

        traceset.seek_n_forward(5).unwrap();
        traceset.seek_to_position(&p).unwrap();
        assert_eq!(position(&traceset), p);
    }

    #[test]
    fn test_stalled_estimate_counts_from_start() {
        for (ratio, growth) in [(0.0, 16), (f64::NAN, 0)] {
            let mut traceset = uneven();
            traceset.config.seek_back_ratio_ns = ratio;
            traceset.config.seek_back_growth = growth;
            traceset.seek_n_forward(10).unwrap();
            let origin = position(&traceset);
            traceset.seek_n_forward(30).unwrap();

            assert_eq!(traceset.seek_n_backward(30, None).unwrap(), 30);
            assert_eq!(position(&traceset), origin, "ratio {} growth {}", ratio, growth);

            assert_eq!(traceset.seek_n_backward(50, None).unwrap(), 10);
            assert_eq!(position(&traceset), traceset.begin_position().unwrap());
        }
    }

    #[test]
    fn test_growth_that_never_widens() {
        let mut traceset = uneven();
        traceset.config.seek_back_growth = 1;
        traceset.seek_n_forward(249).unwrap();
        let origin = position(&traceset);
        traceset.seek_n_forward(usize::MAX).unwrap();

        // the two simultaneous events undershoot a 1ns-per-event guess
        assert_eq!(traceset.seek_n_backward(3, Some(1.0)).unwrap(), 3);
        assert_eq!(position(&traceset), origin);
        assert_eq!(origin.timestamp(), TraceTime::from_nanos(50_000_000));
    }
}
