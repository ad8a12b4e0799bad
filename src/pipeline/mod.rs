//! Decoder element and the pieces it is built from
//!
//! - `element`: lifecycle, data flow and queries of the decoder element
//! - `clock`: presentation timestamp reconstruction from sparse input stamps
//! - `state`: element state machine
//! - `convert`: unit conversion between time, bytes and frames
//! - `events`: caps and property notifications
//! - `health`: session counters

pub mod clock;
pub mod convert;
pub mod element;
pub mod events;
pub mod health;
pub mod state;
pub mod types;

pub use clock::PtsReconstructor;
pub use element::Mpeg2Dec;
pub use events::ElementEvent;
pub use health::DecodeHealth;
pub use state::PipelineState;
pub use types::{Format, FrameRateCode, InputChunk, StreamEvent, Timestamp};
