//! Variable-length integer encoding.
//!
//! Every integer on the wire uses 7 bits per byte, most significant byte
//! first:
//!
//! ```text
//! first byte            middle bytes          last byte
//! ┌─┬─┬──────────┐      ┌─┬─────────────┐     ┌─┬─────────────┐
//! │C│S│ 6 bits   │ ...  │C│ 7 bits      │ ... │0│ 7 bits      │
//! └─┴─┴──────────┘      └─┴─────────────┘     └─┴─────────────┘
//! C = continuation (set on every byte except the last)
//! S = sign (0x40, first byte only)
//! ```
//!
//! Values outside the `i32` range use the same layout over as many bytes as
//! the magnitude needs and decode to [`WireInt::Big`].

use std::fmt;

/// Space reserved in front of every payload for the length prefix.
pub const HEADER_RESERVE: usize = 24;

/// Minimum free space guaranteed by `FrameBuffer::get_end`.
pub const READ_SLACK: usize = 1000;

/// Initial backing capacity of a frame buffer.
pub const INITIAL_CAPACITY: usize = 1024;

/// Continuation bit.
pub const CONTINUATION: u8 = 0x80;

/// Sign bit of the first byte.
pub const SIGN: u8 = 0x40;

/// Maximum encoded size of a 64-bit magnitude.
pub const MAX_NATIVE_VARINT: usize = 10;

/// Integer value carried by the varint codec.
///
/// `Native` holds everything that fits an `i32`; larger values are kept as
/// sign and big-endian magnitude (no leading zero bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WireInt {
    /// Fits a native signed 32-bit integer.
    Native(i32),
    /// Arbitrary precision value outside the `i32` range.
    Big {
        /// Sign of the value.
        negative: bool,
        /// Big-endian magnitude with leading zeros stripped.
        magnitude: Vec<u8>,
    },
}

impl WireInt {
    /// Build a value from a sign and big-endian magnitude, normalizing it.
    pub fn from_magnitude(negative: bool, magnitude: &[u8]) -> Self {
        let first = magnitude
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(magnitude.len());
        let trimmed = &magnitude[first..];

        if trimmed.len() <= 8 {
            let mut be = [0u8; 8];
            be[8 - trimmed.len()..].copy_from_slice(trimmed);
            return Self::from_u64(negative, u64::from_be_bytes(be));
        }

        WireInt::Big {
            negative,
            magnitude: trimmed.to_vec(),
        }
    }

    fn from_u64(negative: bool, magnitude: u64) -> Self {
        if magnitude == 0 {
            return WireInt::Native(0);
        }
        if !negative && magnitude <= i32::MAX as u64 {
            return WireInt::Native(magnitude as i32);
        }
        if negative && magnitude <= 1u64 << 31 {
            return WireInt::Native((-(magnitude as i64)) as i32);
        }

        let be = magnitude.to_be_bytes();
        let first = be.iter().position(|&b| b != 0).unwrap_or(7);
        WireInt::Big {
            negative,
            magnitude: be[first..].to_vec(),
        }
    }

    /// Whether the value fits a native `i32`.
    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self, WireInt::Native(_))
    }

    /// Whether the value is below zero.
    pub fn is_negative(&self) -> bool {
        match self {
            WireInt::Native(v) => *v < 0,
            WireInt::Big { negative, .. } => *negative,
        }
    }

    /// Native value, if the integer fits an `i32`.
    pub fn to_i32(&self) -> Option<i32> {
        match self {
            WireInt::Native(v) => Some(*v),
            WireInt::Big { .. } => None,
        }
    }

    /// Value as `i64`, if it fits.
    pub fn to_i64(&self) -> Option<i64> {
        self.to_i128().and_then(|v| i64::try_from(v).ok())
    }

    /// Value as `i128`, if it fits.
    pub fn to_i128(&self) -> Option<i128> {
        match self {
            WireInt::Native(v) => Some(*v as i128),
            WireInt::Big {
                negative,
                magnitude,
            } => {
                if magnitude.len() > 16 {
                    return None;
                }
                let mut be = [0u8; 16];
                be[16 - magnitude.len()..].copy_from_slice(magnitude);
                let mag = u128::from_be_bytes(be);
                if *negative {
                    if mag <= 1u128 << 127 {
                        Some((mag as i128).wrapping_neg())
                    } else {
                        None
                    }
                } else {
                    i128::try_from(mag).ok()
                }
            }
        }
    }

    /// Encode into the varint byte layout.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            WireInt::Native(v) => {
                let (bytes, n) = encode_u64(*v < 0, (*v as i64).unsigned_abs());
                bytes[..n].to_vec()
            }
            WireInt::Big {
                negative,
                magnitude,
            } => encode_magnitude(*negative, magnitude),
        }
    }
}

impl From<i32> for WireInt {
    fn from(v: i32) -> Self {
        WireInt::Native(v)
    }
}

impl From<i64> for WireInt {
    fn from(v: i64) -> Self {
        WireInt::from_u64(v < 0, v.unsigned_abs())
    }
}

impl From<i128> for WireInt {
    fn from(v: i128) -> Self {
        WireInt::from_magnitude(v < 0, &v.unsigned_abs().to_be_bytes())
    }
}

impl From<usize> for WireInt {
    fn from(v: usize) -> Self {
        WireInt::from_u64(false, v as u64)
    }
}

impl fmt::Display for WireInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = self.to_i128() {
            return write!(f, "{}", v);
        }
        if let WireInt::Big {
            negative,
            magnitude,
        } = self
        {
            if *negative {
                f.write_str("-")?;
            }
            f.write_str("0x")?;
            for b in magnitude {
                write!(f, "{:02x}", b)?;
            }
        }
        Ok(())
    }
}

/// Number of varint bytes for a magnitude with `bits` significant bits.
///
/// `n` bytes carry `6 + 7 * (n - 1)` magnitude bits.
#[inline]
pub fn varint_len(bits: u32) -> usize {
    1 + (bits / 7) as usize
}

/// Encode a 64-bit magnitude. Returns the scratch array and the used length.
pub fn encode_u64(negative: bool, magnitude: u64) -> ([u8; MAX_NATIVE_VARINT], usize) {
    let n = varint_len(64 - magnitude.leading_zeros());
    let mut out = [0u8; MAX_NATIVE_VARINT];
    let mut v = magnitude;

    out[n - 1] = (v & 0x7F) as u8;
    v >>= 7;
    for i in (0..n - 1).rev() {
        out[i] = (v & 0x7F) as u8 | CONTINUATION;
        v >>= 7;
    }
    if negative {
        out[0] |= SIGN;
    }
    (out, n)
}

/// Encode an arbitrary big-endian magnitude.
pub fn encode_magnitude(negative: bool, magnitude: &[u8]) -> Vec<u8> {
    let bits = significant_bits(magnitude);
    let n = varint_len(bits);
    let mut out = Vec::with_capacity(n);

    for j in 0..n {
        let shift = 7 * (n - 1 - j);
        let mut byte = extract_bits(magnitude, shift, 7);
        if j < n - 1 {
            byte |= CONTINUATION;
        }
        out.push(byte);
    }
    if negative {
        out[0] |= SIGN;
    }
    out
}

/// Decode one complete varint (the terminating byte must be the last one).
///
/// Returns `None` for an empty slice.
pub fn decode_varint(bytes: &[u8]) -> Option<WireInt> {
    let (&first, rest) = bytes.split_first()?;
    let negative = first & SIGN != 0;
    let total_bits = 6 + 7 * rest.len();

    if total_bits <= 63 {
        let mut value = (first & 0x3F) as u64;
        for b in rest {
            value = (value << 7) | (b & 0x7F) as u64;
        }
        return Some(WireInt::from_u64(negative, value));
    }

    let mut magnitude = vec![first & 0x3F];
    for b in rest {
        shift_left_7_or(&mut magnitude, b & 0x7F);
    }
    Some(WireInt::from_magnitude(negative, &magnitude))
}

/// Length of the varint that starts at `bytes[0]`, if it is complete.
#[inline]
pub fn varint_extent(bytes: &[u8]) -> Option<usize> {
    bytes
        .iter()
        .position(|b| b & CONTINUATION == 0)
        .map(|i| i + 1)
}

fn significant_bits(magnitude: &[u8]) -> u32 {
    match magnitude.iter().position(|&b| b != 0) {
        Some(i) => (magnitude.len() - i - 1) as u32 * 8 + (8 - magnitude[i].leading_zeros()),
        None => 0,
    }
}

fn bit_at(magnitude: &[u8], bit: usize) -> u8 {
    let from_end = bit / 8;
    if from_end >= magnitude.len() {
        return 0;
    }
    (magnitude[magnitude.len() - 1 - from_end] >> (bit % 8)) & 1
}

fn extract_bits(magnitude: &[u8], shift: usize, width: usize) -> u8 {
    let mut v = 0u8;
    for k in (0..width).rev() {
        v = (v << 1) | bit_at(magnitude, shift + k);
    }
    v
}

fn shift_left_7_or(magnitude: &mut Vec<u8>, low: u8) {
    let mut carry = low as u16;
    for byte in magnitude.iter_mut().rev() {
        let x = ((*byte as u16) << 7) | carry;
        *byte = (x & 0xFF) as u8;
        carry = x >> 8;
    }
    if carry != 0 {
        magnitude.insert(0, carry as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_single_byte() {
        assert_eq!(WireInt::from(0).encode(), vec![0x00]);
        assert_eq!(WireInt::from(1).encode(), vec![0x01]);
        assert_eq!(WireInt::from(63).encode(), vec![0x3F]);
        assert_eq!(WireInt::from(-1).encode(), vec![0x41]);
        assert_eq!(WireInt::from(-63).encode(), vec![0x7F]);
    }

    #[test]
    fn test_byte_layout_msb_first() {
        // 64 = 0b1_000000: first byte carries the top bit, last byte the low 7.
        assert_eq!(WireInt::from(64).encode(), vec![0x80, 0x40]);
        assert_eq!(WireInt::from(-64).encode(), vec![0xC0, 0x40]);
        // 8191 is the largest two-byte magnitude (13 bits).
        assert_eq!(WireInt::from(8191).encode(), vec![0xBF, 0x7F]);
        assert_eq!(WireInt::from(8192).encode(), vec![0x80, 0xC0, 0x00]);
    }

    #[test]
    fn test_varint_len_boundaries() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(6), 1);
        assert_eq!(varint_len(7), 2);
        assert_eq!(varint_len(13), 2);
        assert_eq!(varint_len(14), 3);
        assert_eq!(varint_len(64), 10);
    }

    #[test]
    fn test_native_promotion_boundaries() {
        assert!(WireInt::from(i32::MAX as i64).is_native());
        assert!(WireInt::from(i32::MIN as i64).is_native());
        assert!(!WireInt::from(i32::MAX as i64 + 1).is_native());
        assert!(!WireInt::from(i32::MIN as i64 - 1).is_native());
    }

    #[test]
    fn test_decode_matches_encode_across_ranges() {
        let values: [i128; 12] = [
            0,
            -1,
            1 << 20,
            -(1 << 27),
            i32::MAX as i128,
            i32::MIN as i128,
            i64::MAX as i128,
            i64::MIN as i128,
            (i64::MAX as i128) * 1000,
            -(1i128 << 100),
            i128::MAX,
            i128::MIN + 1,
        ];
        for v in values {
            let encoded = WireInt::from(v).encode();
            assert_eq!(varint_extent(&encoded), Some(encoded.len()));
            assert_eq!(decode_varint(&encoded).unwrap().to_i128(), Some(v), "value {}", v);
        }
    }

    #[test]
    fn test_big_path_uses_same_layout_as_native() {
        // The big-magnitude encoder must agree with the 64-bit fast path.
        for v in [5i64, 1 << 40, -(1 << 50), i64::MAX] {
            let (fast, n) = encode_u64(v < 0, v.unsigned_abs());
            let slow = encode_magnitude(v < 0, &v.unsigned_abs().to_be_bytes());
            assert_eq!(&fast[..n], &slow[..]);
        }
    }

    #[test]
    fn test_magnitude_beyond_i128() {
        let magnitude = [0xFFu8; 20];
        let value = WireInt::from_magnitude(true, &magnitude);
        assert_eq!(value.to_i128(), None);
        assert_eq!(decode_varint(&value.encode()), Some(value));
    }

    #[test]
    fn test_from_magnitude_normalizes() {
        assert_eq!(WireInt::from_magnitude(false, &[0, 0, 5]), WireInt::Native(5));
        assert_eq!(WireInt::from_magnitude(true, &[]), WireInt::Native(0));
    }

    #[test]
    fn test_varint_extent_incomplete() {
        assert_eq!(varint_extent(&[0x80, 0x80]), None);
        assert_eq!(varint_extent(&[]), None);
        assert_eq!(varint_extent(&[0x81, 0x01, 0xFF]), Some(2));
    }

    #[test]
    fn test_decode_empty_slice() {
        assert_eq!(decode_varint(&[]), None);
        assert_eq!(decode_varint(&[0x41]), Some(WireInt::Native(-1)));
    }

    #[test]
    fn test_display() {
        assert_eq!(WireInt::from(-42).to_string(), "-42");
        assert_eq!(
            WireInt::from_magnitude(false, &[1; 17]).to_string(),
            format!("0x{}", "01".repeat(17))
        );
    }
}
