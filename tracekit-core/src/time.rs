//! Trace timestamps
//!
//! Timestamps are nanoseconds since the trace epoch, already corrected for
//! cross-trace clock drift by the decoder.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TraceError;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in trace time, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceTime(u64);

impl TraceTime {
    pub const ZERO: TraceTime = TraceTime(0);
    pub const MAX: TraceTime = TraceTime(u64::MAX);

    pub const fn from_nanos(nanos: u64) -> Self {
        TraceTime(nanos)
    }

    pub const fn from_secs_nanos(secs: u64, nanos: u64) -> Self {
        TraceTime(secs * NANOS_PER_SEC + nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub const fn secs(self) -> u64 {
        self.0 / NANOS_PER_SEC
    }

    pub const fn subsec_nanos(self) -> u64 {
        self.0 % NANOS_PER_SEC
    }

    /// Time as floating point seconds, for display
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    pub fn saturating_sub(self, nanos: u64) -> Self {
        TraceTime(self.0.saturating_sub(nanos))
    }

    pub fn saturating_add(self, nanos: u64) -> Self {
        TraceTime(self.0.saturating_add(nanos))
    }
}

impl Add<u64> for TraceTime {
    type Output = TraceTime;

    fn add(self, nanos: u64) -> TraceTime {
        self.saturating_add(nanos)
    }
}

impl Sub for TraceTime {
    type Output = u64;

    /// Distance in nanoseconds, zero when `rhs` is later
    fn sub(self, rhs: TraceTime) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for TraceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs(), self.subsec_nanos())
    }
}

impl FromStr for TraceTime {
    type Err = TraceError;

    /// Parses `sec`, `sec.frac` (up to nine fractional digits) or a raw
    /// nanosecond count suffixed with `ns`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TraceError::InvalidLiteral {
            field: "time".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let s = s.trim();

        if let Some(raw) = s.strip_suffix("ns") {
            return raw
                .parse::<u64>()
                .map(TraceTime)
                .map_err(|_| invalid("expected an integer nanosecond count"));
        }

        let (secs, frac) = match s.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (s, ""),
        };
        if frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("fraction must be at most nine digits"));
        }
        let secs: u64 = secs
            .parse()
            .map_err(|_| invalid("expected seconds as an unsigned integer"))?;
        let nanos: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<9}", frac)
                .parse()
                .map_err(|_| invalid("bad fraction"))?
        };
        secs.checked_mul(NANOS_PER_SEC)
            .and_then(|n| n.checked_add(nanos))
            .map(TraceTime)
            .ok_or_else(|| invalid("time overflows 64 bits"))
    }
}

/// A closed time range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: TraceTime,
    pub end: TraceTime,
}

impl TimeInterval {
    pub fn new(start: TraceTime, end: TraceTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: TraceTime) -> bool {
        self.start <= time && time <= self.end
    }

    /// Length of the interval in nanoseconds
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
