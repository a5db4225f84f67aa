//! Word length prefix encoding and decoding.
//!
//! Every word on the wire is preceded by its byte length, written with a
//! self-describing variable-width scheme. The high bits of the first byte
//! tell the decoder how many bytes the prefix occupies:
//!
//! ```text
//! ┌─────────────────────────┬───────┬──────────────────────────┐
//! │ Length                  │ Bytes │ First byte               │
//! ├─────────────────────────┼───────┼──────────────────────────┤
//! │ 0 ..= 0x7F              │ 1     │ 0xxxxxxx                 │
//! │ 0x80 ..= 0x3FFF         │ 2     │ 10xxxxxx                 │
//! │ 0x4000 ..= 0x1F_FFFF    │ 3     │ 110xxxxx                 │
//! │ 0x20_0000 ..= 0xFFF_FFFF│ 4     │ 1110xxxx                 │
//! │ 0x1000_0000 ..          │ 5     │ 0xF0, then 4 bytes BE    │
//! └─────────────────────────┴───────┴──────────────────────────┘
//! ```
//!
//! First bytes `0xF8..=0xFF` are reserved control bytes and never start a
//! length.

use bytes::BufMut;

use crate::error::{RouterError, Result};

/// Largest length that fits the 1-byte form.
pub const MAX_1_BYTE: u32 = 0x7F;
/// Largest length that fits the 2-byte form.
pub const MAX_2_BYTE: u32 = 0x3FFF;
/// Largest length that fits the 3-byte form.
pub const MAX_3_BYTE: u32 = 0x1F_FFFF;
/// Largest length that fits the 4-byte form.
pub const MAX_4_BYTE: u32 = 0x0FFF_FFFF;

/// Longest possible prefix in bytes.
pub const MAX_PREFIX_SIZE: usize = 5;

/// Number of bytes `len` occupies once encoded.
#[inline]
pub fn encoded_size(len: u32) -> usize {
    match len {
        0..=MAX_1_BYTE => 1,
        0x80..=MAX_2_BYTE => 2,
        0x4000..=MAX_3_BYTE => 3,
        0x20_0000..=MAX_4_BYTE => 4,
        _ => 5,
    }
}

/// Append the encoded form of `len` to `out`.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use routeros_client::protocol::encode_length;
///
/// let mut buf = BytesMut::new();
/// encode_length(0x80, &mut buf);
/// assert_eq!(&buf[..], &[0x80, 0x80]);
/// ```
pub fn encode_length<B: BufMut>(len: u32, out: &mut B) {
    match encoded_size(len) {
        1 => out.put_u8(len as u8),
        2 => out.put_u16(len as u16 | 0x8000),
        3 => {
            let v = len | 0x00C0_0000;
            out.put_slice(&v.to_be_bytes()[1..]);
        }
        4 => out.put_u32(len | 0xE000_0000),
        _ => {
            out.put_u8(0xF0);
            out.put_u32(len);
        }
    }
}

/// Decode a length prefix from the start of `buf`.
///
/// Returns:
/// - `Ok(Some((len, prefix_size)))` when a full prefix is present
/// - `Ok(None)` when `buf` ends before the prefix does
/// - `Err(...)` when the first byte is a reserved control byte
///
/// Never reads past `buf.len()`.
///
/// # Example
///
/// ```
/// use routeros_client::protocol::decode_length;
///
/// assert_eq!(decode_length(&[0x05]).unwrap(), Some((5, 1)));
/// assert_eq!(decode_length(&[0xC0, 0x40]).unwrap(), None);
/// ```
pub fn decode_length(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    let (size, initial) = if first & 0x80 == 0x00 {
        (1, first as u32)
    } else if first & 0xC0 == 0x80 {
        (2, (first & 0x3F) as u32)
    } else if first & 0xE0 == 0xC0 {
        (3, (first & 0x1F) as u32)
    } else if first & 0xF0 == 0xE0 {
        (4, (first & 0x0F) as u32)
    } else if first == 0xF0 {
        (5, 0)
    } else {
        return Err(RouterError::Protocol(format!(
            "Reserved control byte 0x{:02X} where a length was expected",
            first
        )));
    };

    if buf.len() < size {
        return Ok(None);
    }

    let len = buf[1..size]
        .iter()
        .fold(initial, |acc, &b| (acc << 8) | b as u32);

    Ok(Some((len, size)))
}
