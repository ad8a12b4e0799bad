//! Video output: frame buffers, the three-slot frame pool and the handler
//! that stamps finished frames and hands them downstream.

pub mod buffer;
pub mod frame_pool;
pub mod peer_pool;

use anyhow::Result;
use log::{debug, info, trace, warn};
use std::sync::Arc;

use crate::decoder::{FrameFlags, FrameOp, StreamInfo, VideoOutput};
use crate::pipeline::clock::PtsReconstructor;
use crate::pipeline::events::{ElementEvent, EventBus};
use crate::pipeline::health::DecodeHealth;
use crate::pipeline::types::{FrameRateCode, StreamEvent};

pub use buffer::{ALIGNMENT, FrameMemory, PlaneLayout, VideoBuffer};
pub use frame_pool::{FramePool, NUM_FRAMES, SlotId};
pub use peer_pool::{BufferPool, RecyclingPool};

/// Downstream consumer of decoded frames
pub trait FrameSink {
    /// Take ownership of one reference to a finished frame
    fn push(&mut self, frame: VideoBuffer);

    /// Buffer pool the consumer wants frames allocated from
    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        None
    }

    /// Stream event forwarded after the element handled it
    fn event(&mut self, _event: StreamEvent) {}
}

/// Session state the engine callbacks work on.
///
/// Borrowed from the element for the duration of one engine call.
pub struct FrameOutput<'a> {
    pub pool: &'a mut FramePool,
    pub clock: &'a mut PtsReconstructor,
    pub sink: &'a mut dyn FrameSink,
    pub peer_pool: Option<&'a dyn BufferPool>,
    pub playing: bool,
    pub frame_rate: &'a mut FrameRateCode,
    pub events: &'a mut EventBus,
    pub health: &'a mut DecodeHealth,
}

impl FrameOutput<'_> {
    /// A frame is complete: stamp it and push it downstream, or release it
    /// when the element is not playing.
    fn mark_ready(&mut self, slot: SlotId, info: &StreamInfo) {
        if !self.playing {
            trace!("FrameOutput: not playing, discarding {}", slot);
            self.pool.discard(slot);
            self.health.frames_discarded += 1;
            return;
        }

        let rate = info.frame_rate_code;
        if *self.frame_rate != rate {
            info!("FrameOutput: frame rate {} -> {}", self.frame_rate, rate);
            *self.frame_rate = rate;
            self.health.rate_changes += 1;
            self.events.emit(ElementEvent::FrameRateChanged {
                code: rate,
                fps: rate.fps(),
            });
        }

        let pts = self.clock.next_presentation_timestamp(rate);

        let Some(frame) = self.pool.deliver(slot) else {
            warn!("FrameOutput: {} drawn twice, ignoring", slot);
            return;
        };
        frame.set_pts(pts);
        frame.set_read_only();
        trace!("FrameOutput: pushing frame pts {}", pts);

        self.sink.push(frame);
        self.health.frames_delivered += 1;
    }
}

impl VideoOutput for FrameOutput<'_> {
    fn setup(&mut self, width: u32, height: u32) -> Result<()> {
        self.pool.configure(width, height);
        self.events.emit(ElementEvent::Caps { width, height });
        Ok(())
    }

    fn get_frame(&mut self, flags: FrameFlags) -> Result<SlotId> {
        self.pool.acquire(flags.prediction, self.peer_pool)
    }

    fn frame(&self, slot: SlotId) -> Option<&VideoBuffer> {
        self.pool.buffer(slot)
    }

    fn dispatch(&mut self, op: FrameOp, slot: SlotId, info: &StreamInfo) -> Result<()> {
        match op {
            FrameOp::Draw => self.mark_ready(slot, info),
            FrameOp::Copy | FrameOp::Field | FrameOp::Unused => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        debug!("FrameOutput: engine closed");
    }
}
