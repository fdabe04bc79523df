//! Variable-length integer encoding (LEB128) and zigzag mapping
//!
//! Varints carry tags, lengths and the varint wire type. A 64-bit varint is
//! at most 10 bytes; tags fit in 5.

use crate::error::{Error, Result};
use alloc::vec::Vec;

/// Maximum bytes needed for a u32 varint (5 bytes)
pub const MAX_VARINT_U32_SIZE: usize = 5;

/// Maximum bytes needed for a u64 varint (10 bytes)
pub const MAX_VARINT_U64_SIZE: usize = 10;

/// Append `value` as a varint
#[inline]
pub fn encode_u64(value: u64, out: &mut Vec<u8>) {
    let mut value = value;
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Append `value` as a varint
#[inline]
pub fn encode_u32(value: u32, out: &mut Vec<u8>) {
    encode_u64(value as u64, out)
}

/// Bytes [`encode_u64`] writes for `value`
#[inline]
pub const fn encoded_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Decode a u64 varint from the front of `buf`
///
/// Returns `(value, bytes_consumed)`. Bits past the 64th in the tenth byte
/// are dropped; an eleventh byte is malformed.
#[inline]
pub fn decode_u64(buf: &[u8]) -> Result<(u64, usize)> {
    if let Some(&b) = buf.first() {
        if b < 0x80 {
            return Ok((b as u64, 1));
        }
    }
    let mut result = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT_U64_SIZE).enumerate() {
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(Error::Malformed)
}

/// Decode a u32 varint of at most 5 bytes from the front of `buf`
///
/// Used for tags; bits above 32 are dropped.
#[inline]
pub fn decode_u32(buf: &[u8]) -> Result<(u32, usize)> {
    let mut result = 0u32;
    for (i, &byte) in buf.iter().take(MAX_VARINT_U32_SIZE).enumerate() {
        result |= ((byte & 0x7F) as u32).wrapping_shl(7 * i as u32);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(Error::Malformed)
}

/// Map a signed 32-bit value onto the unsigned zigzag range
#[inline]
pub const fn zigzag_encode_32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode_32`]
#[inline]
pub const fn zigzag_decode_32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// Map a signed 64-bit value onto the unsigned zigzag range
#[inline]
pub const fn zigzag_encode_64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode_64`]
#[inline]
pub const fn zigzag_decode_64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_u64_roundtrip() {
        let test_values = [0, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX];

        for &val in &test_values {
            let mut buf = Vec::new();
            encode_u64(val, &mut buf);
            assert_eq!(buf.len(), encoded_len(val));
            let (decoded_val, decoded_len) = decode_u64(&buf).unwrap();

            assert_eq!(val, decoded_val);
            assert_eq!(buf.len(), decoded_len);
        }
    }

    #[test]
    fn test_known_encodings() {
        let mut buf = Vec::new();
        encode_u32(150, &mut buf);
        assert_eq!(buf, [0x96, 0x01]);
        assert_eq!(decode_u64(&[0x9E, 0xA7, 0x05]).unwrap(), (86942, 3));
        assert_eq!(encoded_len(u64::MAX), 10);
        assert_eq!(encoded_len(0), 1);
    }

    #[test]
    fn test_negative_int32_is_ten_bytes() {
        let mut buf = Vec::new();
        encode_u64(-1i32 as i64 as u64, &mut buf);
        assert_eq!(buf.len(), 10);
        assert_eq!(*buf.last().unwrap(), 0x01);
    }

    #[test]
    fn test_unexpected_eof() {
        assert_eq!(decode_u64(&[0x80]), Err(Error::Malformed));
        assert_eq!(decode_u64(&[]), Err(Error::Malformed));
        assert_eq!(decode_u32(&[0xFF, 0xFF]), Err(Error::Malformed));
    }

    #[test]
    fn test_overlong_rejected() {
        let buf = vec![0xFF; 11];
        assert_eq!(decode_u64(&buf), Err(Error::Malformed));
        assert_eq!(decode_u32(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]), Err(Error::Malformed));
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode_32(0), 0);
        assert_eq!(zigzag_encode_32(-1), 1);
        assert_eq!(zigzag_encode_32(1), 2);
        assert_eq!(zigzag_encode_32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_decode_32(u32::MAX), i32::MIN);
        assert_eq!(zigzag_decode_64(zigzag_encode_64(i64::MIN)), i64::MIN);
        assert_eq!(zigzag_decode_64(3), -2);
    }
}
