use anyhow::{Result, anyhow};
use bytes::{Buf, BytesMut};
use log::{debug, info, trace};

use super::headers::{PictureHeader, SequenceHeader, StartCode, find_start_code};
use super::{DecodeEngine, FrameFlags, FrameOp, StreamInfo, VideoOutput};
use crate::vo::SlotId;

/// Bytes of the `00 00 01 xx` prefix
const START_CODE_LEN: usize = 4;

/// Header-level MPEG-1/2 video engine.
///
/// Parses sequence and picture headers out of an elementary stream and
/// drives the output in the same order a full decoder does: reference
/// pictures are held back until the next reference arrives, B pictures are
/// drawn as soon as they are complete. Pixel content is a flat fill derived
/// from the temporal reference.
pub struct HeaderEngine {
    buffer: BytesMut,
    info: StreamInfo,
    frame_size: Option<(u32, u32)>,
    /// Reference picture waiting to be displayed
    pending_reference: Option<SlotId>,
    pictures: u64,
    skipped: u64,
}

impl HeaderEngine {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            info: StreamInfo::default(),
            frame_size: None,
            pending_reference: None,
            pictures: 0,
            skipped: 0,
        }
    }

    /// Pictures decoded since creation
    pub fn pictures(&self) -> u64 {
        self.pictures
    }

    /// Pictures dropped while waiting for a sequence header
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn on_sequence_header(
        &mut self,
        header: SequenceHeader,
        output: &mut dyn VideoOutput,
    ) -> Result<usize> {
        let mut drawn = 0;
        let size = (header.width, header.height);

        if self.info.frame_rate_code != header.frame_rate_code {
            debug!(
                "HeaderEngine: frame rate code {} -> {}",
                self.info.frame_rate_code, header.frame_rate_code
            );
        }
        self.info.frame_rate_code = header.frame_rate_code;
        self.info.is_sequence_needed = false;

        if self.frame_size != Some(size) {
            // the held reference belongs to the old size
            drawn += self.flush_reference(output)?;
            info!("HeaderEngine: sequence {}x{}", header.width, header.height);
            output.setup(header.width, header.height)?;
            self.frame_size = Some(size);
        }

        Ok(drawn)
    }

    fn on_picture(&mut self, header: PictureHeader, output: &mut dyn VideoOutput) -> Result<usize> {
        if self.info.is_sequence_needed {
            trace!("HeaderEngine: skipping picture before sequence header");
            self.skipped += 1;
            return Ok(0);
        }

        let reference = header.picture_type.is_reference();
        let slot = output.get_frame(FrameFlags {
            prediction: reference,
        })?;
        self.fill(slot, header, output)?;
        output.dispatch(FrameOp::Copy, slot, &self.info)?;
        self.pictures += 1;

        let show = if reference {
            self.pending_reference.replace(slot)
        } else {
            Some(slot)
        };

        match show {
            Some(show) => {
                output.dispatch(FrameOp::Draw, show, &self.info)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn fill(&self, slot: SlotId, header: PictureHeader, output: &dyn VideoOutput) -> Result<()> {
        let buffer = output
            .frame(slot)
            .ok_or_else(|| anyhow!("no buffer behind {}", slot))?;
        let luma = (header.temporal_reference & 0xFF) as u8;

        buffer.write_planes(|planes| {
            planes.y.fill(luma);
            planes.u.fill(0x80);
            planes.v.fill(0x80);
        })
    }

    fn flush_reference(&mut self, output: &mut dyn VideoOutput) -> Result<usize> {
        match self.pending_reference.take() {
            Some(slot) => {
                output.dispatch(FrameOp::Draw, slot, &self.info)?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    /// Handle every complete header from `pos` on.
    ///
    /// `pos` ends past the last header handled, including one whose handler
    /// failed, or at the start of an incomplete one.
    fn scan(&mut self, pos: &mut usize, output: &mut dyn VideoOutput) -> Result<usize> {
        let mut drawn = 0;
        while let Some(start) = find_start_code(&self.buffer, *pos) {
            let payload_at = start + START_CODE_LEN;
            let Some(&value) = self.buffer.get(start + 3) else {
                *pos = start;
                break;
            };

            let code = StartCode::from_byte(value);
            let needed = match code {
                StartCode::SequenceHeader => SequenceHeader::LEN,
                StartCode::Picture => PictureHeader::LEN,
                _ => 0,
            };
            if self.buffer.len() < payload_at + needed {
                *pos = start;
                break;
            }
            *pos = payload_at;

            match code {
                StartCode::SequenceHeader => {
                    if let Some(header) = SequenceHeader::parse(&self.buffer[payload_at..]) {
                        drawn += self.on_sequence_header(header, output)?;
                    } else {
                        debug!("HeaderEngine: invalid sequence header");
                    }
                }
                StartCode::Picture => {
                    if let Some(header) = PictureHeader::parse(&self.buffer[payload_at..]) {
                        drawn += self.on_picture(header, output)?;
                    } else {
                        debug!("HeaderEngine: invalid picture coding type");
                    }
                }
                StartCode::SequenceEnd => {
                    drawn += self.flush_reference(output)?;
                }
                _ => {}
            }
        }
        Ok(drawn)
    }

    /// Drop bytes that were scanned, keeping a possible split prefix
    fn consume(&mut self, keep_from: usize) {
        let len = self.buffer.len();
        let keep_from = keep_from.max(len.saturating_sub(2)).min(len);
        self.buffer.advance(keep_from);
    }
}

impl Default for HeaderEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for HeaderEngine {
    fn reset(&mut self) {
        debug!("HeaderEngine: reset");
        self.buffer.clear();
        self.info = StreamInfo::default();
        self.frame_size = None;
        self.pending_reference = None;
    }

    fn decode(&mut self, data: &[u8], output: &mut dyn VideoOutput) -> Result<usize> {
        self.buffer.extend_from_slice(data);

        let mut pos = 0;
        let drawn = self.scan(&mut pos, output);

        if drawn.is_err()
            || (pos < self.buffer.len() && find_start_code(&self.buffer, pos) == Some(pos))
        {
            // header split across chunks, or unscanned data after a failure
            self.buffer.advance(pos);
        } else {
            self.consume(pos);
        }

        drawn
    }

    fn close(&mut self, output: &mut dyn VideoOutput) -> Result<usize> {
        let drawn = self.flush_reference(output)?;
        output.close();
        self.buffer.clear();
        info!(
            "HeaderEngine: closed after {} pictures ({} skipped)",
            self.pictures, self.skipped
        );
        Ok(drawn)
    }

    fn info(&self) -> StreamInfo {
        self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::testing::{I, P, gop, picture, sequence};
    use crate::pipeline::types::FrameRateCode;
    use crate::vo::{FramePool, VideoBuffer};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Setup(u32, u32),
        Get(bool, usize),
        Draw(usize, u8),
        Close,
    }

    /// Records every callback, backed by a real frame pool
    struct Recorder {
        pool: FramePool,
        calls: Vec<Call>,
        /// Allocations left to refuse
        refuse: usize,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                pool: FramePool::new(),
                calls: Vec::new(),
                refuse: 0,
            }
        }

        fn draws(&self) -> Vec<usize> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Draw(slot, _) => Some(*slot),
                    _ => None,
                })
                .collect()
        }
    }

    impl VideoOutput for Recorder {
        fn setup(&mut self, width: u32, height: u32) -> Result<()> {
            self.pool.configure(width, height);
            self.calls.push(Call::Setup(width, height));
            Ok(())
        }

        fn get_frame(&mut self, flags: FrameFlags) -> Result<SlotId> {
            if self.refuse > 0 {
                self.refuse -= 1;
                return Err(anyhow!("out of memory"));
            }
            let slot = self.pool.acquire(flags.prediction, None)?;
            self.calls.push(Call::Get(flags.prediction, slot.index()));
            Ok(slot)
        }

        fn frame(&self, slot: SlotId) -> Option<&VideoBuffer> {
            self.pool.buffer(slot)
        }

        fn dispatch(&mut self, op: FrameOp, slot: SlotId, _info: &StreamInfo) -> Result<()> {
            if op == FrameOp::Draw {
                let luma = self.pool.buffer(slot).unwrap().with_data(|d| d[0]);
                self.calls.push(Call::Draw(slot.index(), luma));
            }
            Ok(())
        }

        fn close(&mut self) {
            self.calls.push(Call::Close);
        }
    }

    #[test]
    fn test_reference_display_order() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();

        let drawn = engine.decode(&gop(), &mut out).unwrap();
        let flushed = engine.close(&mut out).unwrap();

        assert_eq!(drawn, 6);
        assert_eq!(flushed, 1);
        assert_eq!(
            out.calls,
            vec![
                Call::Setup(32, 16),
                Call::Get(true, 0),
                Call::Get(true, 1),
                Call::Draw(0, 0),
                Call::Get(false, 2),
                Call::Draw(2, 1),
                Call::Get(false, 2),
                Call::Draw(2, 2),
                Call::Get(true, 0),
                Call::Draw(1, 3),
                Call::Get(false, 2),
                Call::Draw(2, 4),
                Call::Get(false, 2),
                Call::Draw(2, 5),
                Call::Draw(0, 6),
                Call::Close,
            ]
        );
        assert_eq!(engine.pictures(), 7);
    }

    #[test]
    fn test_pictures_before_sequence_are_skipped() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();

        let mut stream = picture(0, I);
        stream.extend(picture(1, P));
        assert_eq!(engine.decode(&stream, &mut out).unwrap(), 0);
        assert!(out.calls.is_empty());
        assert!(engine.info().is_sequence_needed);
        assert_eq!(engine.skipped(), 2);

        engine.decode(&gop(), &mut out).unwrap();
        assert!(!engine.info().is_sequence_needed);
        assert_eq!(engine.info().frame_rate_code, FrameRateCode::new(3));
    }

    #[test]
    fn test_headers_split_across_chunks() {
        let stream = gop();

        let mut whole = Recorder::new();
        HeaderEngine::new().decode(&stream, &mut whole).unwrap();

        let mut engine = HeaderEngine::new();
        let mut bytewise = Recorder::new();
        let mut drawn = 0;
        for byte in &stream {
            drawn += engine.decode(std::slice::from_ref(byte), &mut bytewise).unwrap();
        }

        assert_eq!(drawn, 6);
        assert_eq!(bytewise.calls, whole.calls);
    }

    #[test]
    fn test_size_change_flushes_and_sets_up_again() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();

        let mut stream = sequence(32, 16, 3);
        stream.extend(picture(0, I));
        stream.extend(sequence(32, 16, 3));
        stream.extend(picture(1, P));
        stream.extend(sequence(64, 32, 3));
        stream.extend(picture(0, I));
        engine.decode(&stream, &mut out).unwrap();

        let setups: Vec<_> = out
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Setup(..)))
            .cloned()
            .collect();
        assert_eq!(setups, vec![Call::Setup(32, 16), Call::Setup(64, 32)]);
        // I drawn by P, P flushed by the size change
        assert_eq!(out.draws(), vec![0, 1]);
    }

    #[test]
    fn test_sequence_end_flushes_reference() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();

        let mut stream = sequence(32, 16, 3);
        stream.extend(picture(0, I));
        stream.extend([0x00, 0x00, 0x01, 0xB7]);
        assert_eq!(engine.decode(&stream, &mut out).unwrap(), 1);
        assert_eq!(engine.close(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_reset_requires_new_sequence() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();
        engine.decode(&gop(), &mut out).unwrap();

        engine.reset();
        assert!(engine.info().is_sequence_needed);
        assert!(!engine.info().frame_rate_code.is_known());
        assert_eq!(engine.decode(&picture(0, I), &mut out).unwrap(), 0);
        assert_eq!(engine.close(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_failed_picture_is_not_replayed() {
        let mut engine = HeaderEngine::new();
        let mut out = Recorder::new();
        out.refuse = 1;

        assert!(engine.decode(&gop(), &mut out).is_err());
        assert_eq!(out.calls, vec![Call::Setup(32, 16)]);

        // the rest of the buffered stream picks up after the failed I picture
        let drawn = engine.decode(&[], &mut out).unwrap();
        assert_eq!(drawn, 5);
        assert_eq!(engine.pictures(), 6);

        let setups = out.calls.iter().filter(|c| matches!(c, Call::Setup(..))).count();
        let gets = out.calls.iter().filter(|c| matches!(c, Call::Get(..))).count();
        assert_eq!(setups, 1);
        assert_eq!(gets, 6);
        assert_eq!(out.draws(), vec![2, 2, 0, 2, 2]);
    }

    #[test]
    fn test_allocation_error_propagates() {
        struct NoFrames;
        impl VideoOutput for NoFrames {
            fn setup(&mut self, _: u32, _: u32) -> Result<()> {
                Ok(())
            }
            fn get_frame(&mut self, _: FrameFlags) -> Result<SlotId> {
                Err(anyhow!("out of memory"))
            }
            fn frame(&self, _: SlotId) -> Option<&VideoBuffer> {
                None
            }
            fn dispatch(&mut self, _: FrameOp, _: SlotId, _: &StreamInfo) -> Result<()> {
                Ok(())
            }
            fn close(&mut self) {}
        }

        let mut engine = HeaderEngine::new();
        assert!(engine.decode(&gop(), &mut NoFrames).is_err());
    }
}
