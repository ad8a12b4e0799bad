//! Session counters for the decoder element

/// Counters for one decoding session
///
/// Single-threaded by construction: the element owns it and the frame ready
/// handler borrows it for the duration of one engine call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeHealth {
    /// Compressed chunks accepted
    pub chunks_received: u64,

    /// Compressed bytes accepted
    pub bytes_received: u64,

    /// Frames handed downstream
    pub frames_delivered: u64,

    /// Frames released without delivery (element not playing)
    pub frames_discarded: u64,

    /// Frame rate changes seen mid-stream
    pub rate_changes: u64,

    /// Discontinuities signalled upstream
    pub discontinuities: u64,
}

impl DecodeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted input chunk
    pub fn record_chunk(&mut self, size: usize) {
        self.chunks_received += 1;
        self.bytes_received += size as u64;
    }

    /// Share of produced frames that were discarded, as a percentage
    pub fn discard_rate(&self) -> f64 {
        let total = self.frames_delivered + self.frames_discarded;
        if total == 0 {
            return 0.0;
        }
        (self.frames_discarded as f64 / total as f64) * 100.0
    }
}

impl std::fmt::Display for DecodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} chunks ({} bytes), {} frames delivered, {} discarded ({:.2}%), {} rate changes, {} discontinuities",
            self.chunks_received,
            self.bytes_received,
            self.frames_delivered,
            self.frames_discarded,
            self.discard_rate(),
            self.rate_changes,
            self.discontinuities
        )
    }
}
