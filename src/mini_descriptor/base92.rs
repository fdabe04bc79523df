//! Base-92 alphabet and the varints built on it
//!
//! The alphabet is printable ASCII from `' '` to `'~'` minus `"`, `'` and
//! `\`, so descriptors embed in string literals without escaping. It is in
//! ASCII order, which lets range checks compare raw characters.

use crate::error::{BuildError, Result};
use alloc::vec::Vec;

/// The 92 characters, in value order
pub const ALPHABET: &[u8; 92] =
    b" !#$%&()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{|}~";

const fn build_reverse() -> [i8; 128] {
    let mut table = [-1i8; 128];
    let mut i = 0;
    while i < ALPHABET.len() {
        table[ALPHABET[i] as usize] = i as i8;
        i += 1;
    }
    table
}

const FROM_BASE92: [i8; 128] = build_reverse();

/// Character for value `v` (0..92)
#[inline]
pub const fn to_base92(v: u8) -> u8 {
    ALPHABET[v as usize]
}

/// Value of character `ch`, or `None` outside the alphabet
#[inline]
pub const fn from_base92(ch: u8) -> Option<u8> {
    if ch >= 128 {
        return None;
    }
    let v = FROM_BASE92[ch as usize];
    if v < 0 {
        None
    } else {
        Some(v as u8)
    }
}

/// Value of a character already known to be in the alphabet
#[inline]
pub(crate) const fn value(ch: u8) -> u32 {
    match from_base92(ch) {
        Some(v) => v as u32,
        None => 0,
    }
}

#[inline]
const fn log2_ceil(x: u32) -> u32 {
    if x <= 1 {
        0
    } else {
        32 - (x - 1).leading_zeros()
    }
}

/// Decode a varint whose digits are drawn from `min..=max`
///
/// `first` is the already consumed leading character and `data[*pos..]` the
/// rest of the input. Digits carry `log2_ceil(max - min)` bits each, least
/// significant first; decoding stops at the first character outside the
/// range.
pub(crate) fn decode_varint(
    data: &[u8],
    pos: &mut usize,
    first: u8,
    min: u8,
    max: u8,
) -> Result<u32> {
    let bits_per_char = log2_ceil(value(max) - value(min));
    let mut ch = first;
    let mut out = 0u32;
    let mut shift = 0u32;
    loop {
        let bits = value(ch) - value(min);
        out |= bits << shift;
        match data.get(*pos) {
            Some(&next) if (min..=max).contains(&next) && from_base92(next).is_some() => {
                ch = next;
                *pos += 1;
                shift += bits_per_char;
                if shift >= 32 {
                    return Err(BuildError::OverlongVarint.into());
                }
            }
            _ => return Ok(out),
        }
    }
}

/// Append `val` as a varint with digits drawn from `min..=max`
pub(crate) fn encode_varint(out: &mut Vec<u8>, mut val: u32, min: u8, max: u8) {
    let shift = log2_ceil(value(max) - value(min) + 1);
    let mask = (1u32 << shift) - 1;
    loop {
        let bits = (val & mask) + value(min);
        out.push(to_base92(bits as u8));
        val >>= shift;
        if val == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mini_descriptor::{MAX_MODIFIER, MAX_SKIP, MIN_MODIFIER, MIN_SKIP};
    use alloc::vec;

    #[test]
    fn test_alphabet_excludes_quotes_and_backslash() {
        assert!(!ALPHABET.contains(&b'"'));
        assert!(!ALPHABET.contains(&b'\''));
        assert!(!ALPHABET.contains(&b'\\'));
        assert!(ALPHABET.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_character_values() {
        assert_eq!(from_base92(b' '), Some(0));
        assert_eq!(from_base92(b'~'), Some(91));
        assert_eq!(from_base92(b'"'), None);
        assert_eq!(to_base92(20), b'6');
        for v in 0..92u8 {
            assert_eq!(from_base92(to_base92(v)), Some(v));
        }
    }

    #[test]
    fn test_skip_varint_spans_chars() {
        let mut out = vec![];
        encode_varint(&mut out, 1000, MIN_SKIP, MAX_SKIP);
        assert!(out.len() > 1);
        let mut pos = 1;
        let v = decode_varint(&out, &mut pos, out[0], MIN_SKIP, MAX_SKIP).unwrap();
        assert_eq!(v, 1000);
        assert_eq!(pos, out.len());
    }

    #[test]
    fn test_overlong_varint_rejected() {
        // Nine modifier digits carry 36 bits.
        let data = [MIN_MODIFIER + 1; 9];
        let mut pos = 1;
        assert!(decode_varint(&data, &mut pos, data[0], MIN_MODIFIER, MAX_MODIFIER).is_err());
    }
}
