//! Elementary stream builders for tests

pub const I: u8 = 1;
pub const P: u8 = 2;
pub const B: u8 = 3;

/// Sequence header with aspect code 2
pub fn sequence(width: u32, height: u32, rate: u8) -> Vec<u8> {
    vec![
        0x00,
        0x00,
        0x01,
        0xB3,
        (width >> 4) as u8,
        (((width & 0x0F) << 4) | (height >> 8)) as u8,
        (height & 0xFF) as u8,
        0x20 | rate,
    ]
}

/// Picture header followed by one short slice
pub fn picture(temporal_reference: u16, coding_type: u8) -> Vec<u8> {
    vec![
        0x00,
        0x00,
        0x01,
        0x00,
        (temporal_reference >> 2) as u8,
        (((temporal_reference & 0x03) << 6) as u8) | (coding_type << 3),
        0x00,
        0x00,
        0x01,
        0x01,
        0xAA,
        0xBB,
    ]
}

/// 32x16 at 25 fps, coded order I P B B P B B
pub fn gop() -> Vec<u8> {
    let mut stream = sequence(32, 16, 3);
    for (tr, t) in [(0, I), (3, P), (1, B), (2, B), (6, P), (4, B), (5, B)] {
        stream.extend(picture(tr, t));
    }
    stream
}
