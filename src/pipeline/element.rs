//! The MPEG video decoder element
//!
//! Owns the decoding engine and the session state the engine callbacks work
//! on, and exposes the element surface: lifecycle, data flow, events,
//! properties and conversion queries.

use anyhow::{Result, anyhow, bail};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::clock::PtsReconstructor;
use super::convert::StreamGeometry;
use super::events::{ElementEvent, EventBus};
use super::health::DecodeHealth;
use super::state::{PipelineState, StateTransition};
use super::types::{Format, FrameRateCode, InputChunk, StreamEvent};
use crate::decoder::DecodeEngine;
use crate::vo::{BufferPool, FrameOutput, FramePool, FrameSink};

/// MPEG-1/2 video decoder element
///
/// Compressed chunks go in through [`Mpeg2Dec::chain`]; decoded I420 frames
/// come out through the [`FrameSink`], stamped with reconstructed
/// presentation timestamps. Frames are only delivered while `Playing`.
pub struct Mpeg2Dec<E: DecodeEngine, S: FrameSink> {
    engine: E,
    sink: S,
    state: PipelineState,
    pool: Option<FramePool>,
    clock: PtsReconstructor,
    /// Buffer pool latched from the sink while playing
    peer_pool: Option<Arc<dyn BufferPool>>,
    frame_rate: FrameRateCode,
    /// The engine was closed, by end-of-stream or deactivation
    closed: bool,
    events: EventBus,
    health: DecodeHealth,
}

impl<E: DecodeEngine, S: FrameSink> Mpeg2Dec<E, S> {
    pub fn new(engine: E, sink: S) -> Self {
        Self {
            engine,
            sink,
            state: PipelineState::Null,
            pool: None,
            clock: PtsReconstructor::new(),
            peer_pool: None,
            frame_rate: FrameRateCode::UNKNOWN,
            closed: false,
            events: EventBus::new(),
            health: DecodeHealth::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Walk to `target` one step at a time, running the hook of every step.
    ///
    /// The state is updated before its hook runs.
    pub fn set_state(&mut self, target: PipelineState) -> Result<()> {
        while let Some(next) = self.state.step_towards(target) {
            let transition = self
                .state
                .transition_to(&next)
                .ok_or_else(|| anyhow!("no transition from {} to {}", self.state, next))?;

            debug!("Mpeg2Dec: {} -> {}", self.state, next);
            self.state = next;
            self.on_transition(transition)?;
        }
        Ok(())
    }

    fn on_transition(&mut self, transition: StateTransition) -> Result<()> {
        match transition {
            StateTransition::ReadyToPaused => self.activate(),
            StateTransition::PausedToPlaying => {
                self.peer_pool = self.sink.buffer_pool();
                info!(
                    "Mpeg2Dec: playing ({})",
                    if self.peer_pool.is_some() {
                        "downstream buffer pool"
                    } else {
                        "own buffers"
                    }
                );
            }
            StateTransition::PlayingToPaused => {
                self.peer_pool = None;
                info!("Mpeg2Dec: paused");
            }
            StateTransition::PausedToReady => return self.deactivate(),
            StateTransition::NullToReady | StateTransition::ReadyToNull => {}
        }
        Ok(())
    }

    fn activate(&mut self) {
        info!("Mpeg2Dec: activating");
        self.pool = Some(FramePool::new());
        self.engine.reset();
        self.clock = PtsReconstructor::new();
        self.frame_rate = FrameRateCode::UNKNOWN;
        self.peer_pool = None;
        self.closed = false;
        self.health = DecodeHealth::new();
    }

    fn deactivate(&mut self) -> Result<()> {
        let flushed = self.close_engine();
        if let Some(pool) = self.pool.take() {
            pool.destroy();
        }
        info!("Mpeg2Dec: deactivated. {}", self.health);
        flushed.map(|_| ())
    }

    /// Engine plus the callback context borrowed from the session
    fn session(&mut self) -> Option<(&mut E, FrameOutput<'_>)> {
        let pool = self.pool.as_mut()?;
        let output = FrameOutput {
            pool,
            clock: &mut self.clock,
            sink: &mut self.sink,
            peer_pool: self.peer_pool.as_deref(),
            playing: self.state.is_playing(),
            frame_rate: &mut self.frame_rate,
            events: &mut self.events,
            health: &mut self.health,
        };
        Some((&mut self.engine, output))
    }

    /// Flush and close the engine, once per session.
    ///
    /// Returns the number of frames the flush drew.
    fn close_engine(&mut self) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }
        self.closed = true;

        match self.session() {
            Some((engine, mut output)) => engine.close(&mut output),
            None => Ok(0),
        }
    }

    /// Push one compressed chunk through the engine.
    ///
    /// Returns the number of frames the engine drew. Chunks arriving after
    /// the engine was closed are dropped.
    pub fn chain(&mut self, chunk: InputChunk) -> Result<usize> {
        if !self.state.is_active() {
            bail!("chunk received while {}", self.state);
        }
        if self.closed {
            debug!("Mpeg2Dec: dropping {:?} after close", chunk);
            return Ok(0);
        }

        self.health.record_chunk(chunk.size());
        let rate = self.engine.info().frame_rate_code;
        self.clock.on_input_chunk(chunk.pts, rate);

        let state = self.state;
        let (engine, mut output) = self
            .session()
            .ok_or_else(|| anyhow!("no frame pool while {}", state))?;
        engine.decode(&chunk.data, &mut output)
    }

    /// Handle an event from upstream, then forward it to the sink.
    pub fn handle_event(&mut self, event: StreamEvent) -> Result<()> {
        match event {
            StreamEvent::Discontinuity => {
                debug!("Mpeg2Dec: discontinuity");
                self.clock.on_discontinuity();
                self.health.discontinuities += 1;
            }
            StreamEvent::Eos => {
                if self.state.is_active() {
                    let flushed = self.close_engine()?;
                    info!("Mpeg2Dec: end of stream, {} frames flushed", flushed);
                } else {
                    warn!("Mpeg2Dec: end of stream while {}", self.state);
                }
            }
        }
        self.sink.event(event);
        Ok(())
    }

    /// Frames per second of the last frame delivered, `0.0` before any
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate.fps()
    }

    pub fn frame_rate_code(&self) -> FrameRateCode {
        self.frame_rate
    }

    /// Receive caps and `frame_rate` notifications
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ElementEvent> {
        self.events.subscribe()
    }

    fn geometry(&self) -> StreamGeometry {
        let (width, height) = self
            .pool
            .as_ref()
            .and_then(FramePool::frame_size)
            .unwrap_or((0, 0));

        StreamGeometry {
            width,
            height,
            rate: self.engine.info().frame_rate_code,
        }
    }

    /// Convert between output units using the current stream geometry.
    pub fn convert(&self, src: Format, value: i64, dest: Format) -> Option<(Format, i64)> {
        self.geometry().convert(src, value, dest)
    }

    /// Position of the next frame, in `format` (`Default` means time)
    pub fn query_position(&self, format: Format) -> Option<(Format, i64)> {
        let format = match format {
            Format::Default => Format::Time,
            other => other,
        };
        self.convert(Format::Time, self.clock.next_time().nanos, format)
    }

    pub fn clock(&self) -> &PtsReconstructor {
        &self.clock
    }

    pub fn health(&self) -> &DecodeHealth {
        &self.health
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Return to `Null` and hand back the sink
    pub fn into_sink(mut self) -> Result<S> {
        self.set_state(PipelineState::Null)?;
        Ok(self.sink)
    }
}
