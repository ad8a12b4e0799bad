use crate::pipeline::types::FrameRateCode;

/// Start code values following the `00 00 01` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCode {
    Picture,
    Slice(u8),
    UserData,
    SequenceHeader,
    SequenceError,
    Extension,
    SequenceEnd,
    GroupOfPictures,
    System(u8),
    Reserved(u8),
}

impl StartCode {
    pub fn from_byte(value: u8) -> Self {
        match value {
            0x00 => StartCode::Picture,
            0x01..=0xAF => StartCode::Slice(value),
            0xB2 => StartCode::UserData,
            0xB3 => StartCode::SequenceHeader,
            0xB4 => StartCode::SequenceError,
            0xB5 => StartCode::Extension,
            0xB7 => StartCode::SequenceEnd,
            0xB8 => StartCode::GroupOfPictures,
            0xB9..=0xFF => StartCode::System(value),
            _ => StartCode::Reserved(value),
        }
    }
}

/// Position of the next `00 00 01` prefix at or after `from`.
///
/// The returned index points at the first zero byte.
pub fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i + 2] > 1 {
            // no prefix can end before i + 3
            i += 3;
        } else if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            return Some(i);
        } else {
            i += 1;
        }
    }
    None
}

/// Fields of a sequence header used for output setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeader {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: u8,
    pub frame_rate_code: FrameRateCode,
}

impl SequenceHeader {
    /// Bytes needed after the start code
    pub const LEN: usize = 4;

    /// Parse the payload following `00 00 01 B3`
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b = payload.get(..Self::LEN)?;
        let width = ((b[0] as u32) << 4) | ((b[1] as u32) >> 4);
        let height = (((b[1] & 0x0F) as u32) << 8) | b[2] as u32;
        if width == 0 || height == 0 {
            return None;
        }

        Some(Self {
            width,
            height,
            aspect_ratio: b[3] >> 4,
            frame_rate_code: FrameRateCode::new(b[3] & 0x0F),
        })
    }
}

/// Coding type of a picture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureType {
    Intra,
    Predicted,
    Bidirectional,
    DcOnly,
}

impl PictureType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(PictureType::Intra),
            2 => Some(PictureType::Predicted),
            3 => Some(PictureType::Bidirectional),
            4 => Some(PictureType::DcOnly),
            _ => None,
        }
    }

    /// Other pictures may reference this one
    pub fn is_reference(&self) -> bool {
        !matches!(self, PictureType::Bidirectional)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PictureHeader {
    pub temporal_reference: u16,
    pub picture_type: PictureType,
}

impl PictureHeader {
    pub const LEN: usize = 2;

    /// Parse the payload following `00 00 01 00`
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let b = payload.get(..Self::LEN)?;
        let temporal_reference = ((b[0] as u16) << 2) | ((b[1] as u16) >> 6);
        let picture_type = PictureType::from_code((b[1] >> 3) & 0x07)?;

        Some(Self {
            temporal_reference,
            picture_type,
        })
    }
}
