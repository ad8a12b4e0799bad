//! Frame sink of the command line front-end

use log::{info, warn};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::pipeline::types::StreamEvent;
use crate::vo::{BufferPool, FrameSink, RecyclingPool, VideoBuffer};

/// One line of output per decoded frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    pub index: u64,
    pub pts_ms: Option<f64>,
    pub width: u32,
    pub height: u32,
    /// First luma sample
    pub luma: u8,
}

impl FrameRecord {
    pub fn from_buffer(index: u64, frame: &VideoBuffer) -> Self {
        Self {
            index,
            pts_ms: frame.pts().map(|t| t.nanos as f64 / 1e6),
            width: frame.width(),
            height: frame.height(),
            luma: frame.with_data(|d| d.first().copied().unwrap_or_default()),
        }
    }
}

/// Reports every frame, as a JSON line on `out` or as a log line
pub struct FrameReport<W: Write> {
    out: W,
    json: bool,
    frames: u64,
    pool: Option<RecyclingPool>,
    eos: bool,
}

impl<W: Write> FrameReport<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            frames: 0,
            pool: None,
            eos: false,
        }
    }

    /// Offer a recycling pool for the decoder to allocate frames from
    pub fn with_pool(mut self) -> Self {
        self.pool = Some(RecyclingPool::new());
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn pool(&self) -> Option<&RecyclingPool> {
        self.pool.as_ref()
    }

    pub fn reached_eos(&self) -> bool {
        self.eos
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for FrameReport<W> {
    fn push(&mut self, frame: VideoBuffer) {
        let record = FrameRecord::from_buffer(self.frames, &frame);
        self.frames += 1;

        if self.json {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    if let Err(e) = writeln!(self.out, "{}", line) {
                        warn!("FrameReport: write failed: {}", e);
                    }
                }
                Err(e) => warn!("FrameReport: {}", e),
            }
        } else {
            info!(
                "frame {} pts {} {}x{}",
                record.index,
                frame
                    .pts()
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "none".into()),
                record.width,
                record.height
            );
        }
    }

    fn buffer_pool(&self) -> Option<Arc<dyn BufferPool>> {
        let pool = self.pool.clone()?;
        Some(Arc::new(pool))
    }

    fn event(&mut self, event: StreamEvent) {
        if event == StreamEvent::Eos {
            self.eos = true;
            if let Err(e) = self.out.flush() {
                warn!("FrameReport: flush failed: {}", e);
            }
        }
    }
}
