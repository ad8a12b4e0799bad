//! Core types for the pipeline system

use bytes::Bytes;
use std::ops::{Add, Sub};

/// Nanoseconds in one second.
pub const SECOND: i64 = 1_000_000_000;

/// Nanoseconds in one millisecond.
pub const MSECOND: i64 = 1_000_000;

/// Timestamp representation for media frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Nanoseconds since the start of the stream
    pub nanos: i64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { nanos: 0 };

    /// Create a new timestamp from nanoseconds
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a new timestamp from milliseconds, saturating at the i64 range
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis.saturating_mul(MSECOND),
        }
    }

    /// Milliseconds, rounded towards zero
    pub fn as_millis(&self) -> i64 {
        self.nanos / MSECOND
    }

    /// Absolute distance between two timestamps in nanoseconds
    pub fn abs_diff(&self, other: Timestamp) -> u64 {
        self.nanos.abs_diff(other.nanos)
    }
}

impl Add<i64> for Timestamp {
    type Output = Timestamp;

    fn add(self, nanos: i64) -> Timestamp {
        Timestamp {
            nanos: self.nanos.saturating_add(nanos),
        }
    }
}

impl Sub<i64> for Timestamp {
    type Output = Timestamp;

    fn sub(self, nanos: i64) -> Timestamp {
        Timestamp {
            nanos: self.nanos.saturating_sub(nanos),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.nanos < 0 { "-" } else { "" };
        let abs = self.nanos.unsigned_abs();
        write!(
            f,
            "{}{}.{:06}ms",
            sign,
            abs / MSECOND as u64,
            abs % MSECOND as u64
        )
    }
}

/// Frame rates indexed by the 4-bit MPEG `frame_rate_code`.
///
/// Codes 0, 14 and 15 are forbidden/reserved and carry a rate of zero.
pub const VIDEO_RATES: [f64; 16] = [
    0.0,
    24000.0 / 1001.0,
    24.0,
    25.0,
    30000.0 / 1001.0,
    30.0,
    50.0,
    60000.0 / 1001.0,
    60.0,
    1.0,
    5.0,
    10.0,
    12.0,
    15.0,
    0.0,
    0.0,
];

/// Frame rate code as reported by the decoding engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FrameRateCode(u8);

impl FrameRateCode {
    /// Rate not known yet (also what reserved codes mean)
    pub const UNKNOWN: FrameRateCode = FrameRateCode(0);

    /// Only the low 4 bits are significant.
    pub const fn new(code: u8) -> Self {
        Self(code & 0x0f)
    }

    pub fn code(&self) -> u8 {
        self.0
    }

    /// Frames per second, `0.0` when unknown
    pub fn fps(&self) -> f64 {
        VIDEO_RATES[self.0 as usize]
    }

    pub fn is_known(&self) -> bool {
        self.fps() > 0.0
    }

    /// Duration of one frame in nanoseconds, `None` for unknown/reserved codes
    pub fn frame_duration(&self) -> Option<i64> {
        let fps = self.fps();
        if fps > 0.0 {
            Some((SECOND as f64 / fps) as i64)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FrameRateCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_known() {
            write!(f, "{:.3}fps (code {})", self.fps(), self.0)
        } else {
            write!(f, "unknown (code {})", self.0)
        }
    }
}

/// A chunk of compressed video as received on the sink side
#[derive(Clone)]
pub struct InputChunk {
    /// Compressed elementary stream bytes
    pub data: Bytes,

    /// Timestamp attached upstream, if any
    pub pts: Option<Timestamp>,
}

impl InputChunk {
    pub fn new(data: Bytes, pts: Option<Timestamp>) -> Self {
        Self { data, pts }
    }

    /// Get the size of the chunk in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for InputChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputChunk")
            .field("size", &self.size())
            .field("pts", &self.pts)
            .finish()
    }
}

/// Out-of-band events travelling with the data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Upstream timestamps are no longer continuous
    Discontinuity,
    /// No more data will arrive
    Eos,
}

/// Units for conversion and position queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Let the element pick its preferred format
    Default,
    /// Nanoseconds
    Time,
    /// Bytes of decoded I420 output
    Bytes,
    /// Frames
    Units,
}
