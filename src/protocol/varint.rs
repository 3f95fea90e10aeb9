//! Base-128 varint for message ids.
//!
//! Groups of 7 bits, least significant group first. The high bit of each
//! byte is set when more bytes follow.

use bytes::BufMut;

use crate::error::DecodeError;

/// Maximum encoded length of a `u32` varint.
pub const MAX_VARINT_LEN: usize = 5;

/// Append the varint encoding of `value` to `buf`.
pub fn encode_varint(mut value: u32, buf: &mut impl BufMut) {
    loop {
        let group = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(group);
            return;
        }
        buf.put_u8(group | 0x80);
    }
}

/// Number of bytes `value` occupies when encoded.
pub fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Decode a varint from the start of `buf`.
///
/// Returns the value and the number of bytes read. Never reads past `buf`.
pub fn decode_varint(buf: &[u8]) -> Result<(u32, usize), DecodeError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(DecodeError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            let value = u32::try_from(value).map_err(|_| DecodeError::VarintOverflow)?;
            return Ok((value, i + 1));
        }
    }
    Err(DecodeError::Truncated)
}
