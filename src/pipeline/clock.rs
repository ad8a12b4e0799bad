//! Presentation timestamp reconstruction for decoded frames

use log::{debug, trace};

use super::types::{FrameRateCode, MSECOND, Timestamp};

/// Frames that must pass without an anchor before drift is measured.
pub const DRIFT_MIN_FRAMES: u64 = 10;

/// A jump larger than this many frame durations is a hard discontinuity.
pub const JUMP_FRAMES: i64 = 10;

/// Frames the decoder keeps back for reordering; output times are shifted
/// back by this many frame durations.
pub const REORDER_DEPTH: i64 = 3;

/// Presentation timestamp reconstructor
///
/// Input timestamps are sparse and not always monotonic, while the decoder
/// emits frames at the stream's nominal rate. The reconstructor keeps its own
/// running estimate of the next presentation time and:
/// - steps it by one frame duration (plus a drift correction) per frame
/// - re-anchors it to an input timestamp when more than 10 frames passed
///   without one and the two disagree, deriving a per-frame drift correction
/// - re-anchors it when input jumps by more than 10 frame durations
/// - never lets it fall behind a timestamp the input already declared
///
/// One instance lives for one decoding session and is reset on discontinuity.
#[derive(Debug, Clone)]
pub struct PtsReconstructor {
    /// Running estimate of the next frame's presentation time
    next_time: Timestamp,

    /// Most recent input timestamp
    last_input: Option<Timestamp>,

    /// Frames emitted since `next_time` was last anchored
    frames_since_anchor: u64,

    /// Correction added to each frame step (nanoseconds)
    drift_adjustment: i64,

    /// No frame emitted yet in this session
    first: bool,

    /// Lowest value the next returned timestamp may take
    floor: Timestamp,
}

impl PtsReconstructor {
    pub fn new() -> Self {
        Self {
            next_time: Timestamp::ZERO,
            last_input: None,
            frames_since_anchor: 0,
            drift_adjustment: 0,
            first: true,
            floor: Timestamp::ZERO,
        }
    }

    /// Update anchor and drift state from the timestamp of an incoming chunk.
    ///
    /// Must run before the chunk is handed to the decoding engine. `rate` is
    /// the rate code the engine currently reports.
    pub fn on_input_chunk(&mut self, pts: Option<Timestamp>, rate: FrameRateCode) {
        let Some(pts) = pts else {
            return;
        };

        if !self.first {
            match self.last_input {
                Some(last) => self.track(pts, last, rate),
                None => self.anchor(pts),
            }
        }

        if self.next_time < pts {
            self.next_time = pts;
        }
        self.last_input = Some(pts);
    }

    fn track(&mut self, pts: Timestamp, last: Timestamp, rate: FrameRateCode) {
        let step = rate.frame_duration();
        let diff = pts.abs_diff(last);

        if last < pts {
            if pts != self.next_time && self.frames_since_anchor > DRIFT_MIN_FRAMES {
                if let Some(step) = step
                    && diff > (step + MSECOND) as u64
                {
                    // below i64::MAX: at least 11 frames divide a u64
                    let per_frame = (diff / self.frames_since_anchor) as i64;
                    self.drift_adjustment = per_frame + 1 - step;
                    debug!(
                        "Clock: drift over {} frames, adjusting step by {}ns",
                        self.frames_since_anchor, self.drift_adjustment
                    );
                }
                self.next_time = pts;
            }
            self.frames_since_anchor = 0;
        }

        // evaluated against the previous input timestamp
        if let Some(step) = step
            && diff > (step * JUMP_FRAMES) as u64
        {
            debug!("Clock: input jumped {} -> {}, re-anchoring", last, pts);
            self.anchor(pts);
            if pts < last {
                // input went backwards, so may the output
                self.floor = Timestamp::ZERO;
            }
        }
    }

    fn anchor(&mut self, pts: Timestamp) {
        self.frames_since_anchor = 0;
        self.next_time = pts;
    }

    /// Timestamp for the frame being emitted now, then step to the next one.
    ///
    /// The result is shifted back by the reorder depth and never negative nor
    /// lower than the previous result, unless the input jumped backwards.
    pub fn next_presentation_timestamp(&mut self, rate: FrameRateCode) -> Timestamp {
        let step = rate.frame_duration().unwrap_or(0);

        let pts = (self.next_time - REORDER_DEPTH * step)
            .max(self.floor)
            .max(Timestamp::ZERO);
        self.floor = pts;

        trace!("Clock: out {} rate {}", pts, rate);

        self.next_time = self.next_time + (step + self.drift_adjustment);
        self.frames_since_anchor += 1;
        self.first = false;

        pts
    }

    /// Forget everything, as if a new session started
    pub fn on_discontinuity(&mut self) {
        debug!("Clock: discontinuity, resetting");
        *self = Self::new();
    }

    /// Running estimate of the next presentation time
    pub fn next_time(&self) -> Timestamp {
        self.next_time
    }

    pub fn last_input(&self) -> Option<Timestamp> {
        self.last_input
    }

    pub fn frames_since_anchor(&self) -> u64 {
        self.frames_since_anchor
    }

    /// Per-frame drift correction in nanoseconds
    pub fn drift_adjustment(&self) -> i64 {
        self.drift_adjustment
    }

    pub fn is_first(&self) -> bool {
        self.first
    }
}

impl Default for PtsReconstructor {
    fn default() -> Self {
        Self::new()
    }
}
