//! Source-side unit conversion between time, output bytes and frames

use super::types::{Format, FrameRateCode, SECOND};
use crate::vo::PlaneLayout;

/// What a conversion needs to know about the decoded stream
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamGeometry {
    pub width: u32,
    pub height: u32,
    pub rate: FrameRateCode,
}

impl StreamGeometry {
    fn frame_bytes(&self) -> i64 {
        PlaneLayout::new(self.width, self.height).size() as i64
    }

    /// Convert `value` from `src` to `dest`.
    ///
    /// Identical formats convert to themselves. A `Default` destination
    /// resolves to the element's preferred format and is reported back with
    /// the result. `None` when the conversion is not supported or the frame
    /// rate is needed but unknown.
    pub fn convert(&self, src: Format, value: i64, dest: Format) -> Option<(Format, i64)> {
        let fps = self.rate.fps();

        if src == dest && src != Format::Default {
            return Some((dest, value));
        }

        match src {
            Format::Time => match dest {
                Format::Default | Format::Bytes => {
                    let bytes = value as f64 * self.frame_bytes() as f64 * fps / SECOND as f64;
                    Some((Format::Bytes, bytes as i64))
                }
                Format::Units => Some((Format::Units, (value as f64 * fps / SECOND as f64) as i64)),
                Format::Time => Some((Format::Time, value)),
            },
            Format::Units => match dest {
                Format::Default | Format::Time => {
                    if !self.rate.is_known() {
                        return None;
                    }
                    Some((Format::Time, (value as f64 * SECOND as f64 / fps) as i64))
                }
                Format::Bytes => Some((Format::Bytes, value.checked_mul(self.frame_bytes())?)),
                Format::Units => Some((Format::Units, value)),
            },
            Format::Bytes | Format::Default => None,
        }
    }
}
