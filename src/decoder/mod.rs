//! Decoding engine contract
//!
//! The engine consumes compressed bytes and calls back into a [`VideoOutput`]
//! synchronously, from inside [`DecodeEngine::decode`], to obtain frame slots
//! and to report when a frame is ready for display.

mod engine;
mod headers;
#[cfg(test)]
pub(crate) mod testing;

use anyhow::Result;

use crate::pipeline::types::FrameRateCode;
use crate::vo::{SlotId, VideoBuffer};

pub use engine::HeaderEngine;
pub use headers::{PictureHeader, PictureType, SequenceHeader, StartCode, find_start_code};

/// Properties of the picture a slot is requested for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// Later pictures predict from this one
    pub prediction: bool,
}

/// Operation the engine requests on a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOp {
    /// The frame is complete and ready for display
    Draw,
    /// Part of the frame was written
    Copy,
    /// One field of an interlaced frame was written
    Field,
    /// Reserved by the engine contract, never requested
    Unused,
}

/// Engine-side stream information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Rate code of the current sequence header
    pub frame_rate_code: FrameRateCode,

    /// No sequence header decoded since the last reset
    pub is_sequence_needed: bool,
}

impl Default for StreamInfo {
    fn default() -> Self {
        Self {
            frame_rate_code: FrameRateCode::UNKNOWN,
            is_sequence_needed: true,
        }
    }
}

/// Callbacks the engine drives while decoding
pub trait VideoOutput {
    /// The picture size is known or changed
    fn setup(&mut self, width: u32, height: u32) -> Result<()>;

    /// Hand a slot to write the next picture into
    fn get_frame(&mut self, flags: FrameFlags) -> Result<SlotId>;

    /// Buffer behind a slot handed out by [`VideoOutput::get_frame`]
    fn frame(&self, slot: SlotId) -> Option<&VideoBuffer>;

    fn dispatch(&mut self, op: FrameOp, slot: SlotId, info: &StreamInfo) -> Result<()>;

    /// The engine is shutting down
    fn close(&mut self);
}

/// An MPEG video decoding engine
pub trait DecodeEngine {
    /// Forget the stream: a sequence header is needed again
    fn reset(&mut self);

    /// Decode a chunk, calling back into `output`.
    ///
    /// Returns the number of frames drawn.
    fn decode(&mut self, data: &[u8], output: &mut dyn VideoOutput) -> Result<usize>;

    /// Flush frames still held for reference and close.
    ///
    /// Returns the number of frames drawn.
    fn close(&mut self, output: &mut dyn VideoOutput) -> Result<usize>;

    fn info(&self) -> StreamInfo;
}
