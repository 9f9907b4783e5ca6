//! Growable buffer implementing the length-prefixed message codec.
//!
//! Uses `bytes::BytesMut` as backing storage with three cursors:
//! - `begin`: start of the payload (moves backward when the length prefix
//!   is written by [`FrameBuffer::calculate_length`])
//! - `pos`: read cursor
//! - `len`: payload length counted from `begin`
//!
//! `begin <= pos <= begin + len` holds at all times. Capacity grows
//! geometrically and is never released by [`FrameBuffer::reset`].
//!
//! # Example
//!
//! ```
//! use mctr_link::protocol::FrameBuffer;
//!
//! let mut out = FrameBuffer::new();
//! out.push_int(62);
//! out.push_string("port_a");
//! out.calculate_length().unwrap();
//!
//! let mut incoming = FrameBuffer::new();
//! incoming.push_received(out.as_bytes());
//! assert!(incoming.is_message().unwrap());
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_varint, encode_magnitude, encode_u64, varint_extent, WireInt, HEADER_RESERVE,
    INITIAL_CAPACITY, READ_SLACK,
};
use crate::error::{LinkError, Result};

/// Buffer for building outgoing frames and accumulating incoming bytes.
pub struct FrameBuffer {
    /// Backing storage; its length is the current capacity.
    data: BytesMut,
    /// Start of the payload.
    begin: usize,
    /// Absolute read cursor.
    pos: usize,
    /// Payload length from `begin`.
    len: usize,
}

impl FrameBuffer {
    /// Create an empty buffer with header space reserved.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create an empty buffer able to hold `capacity` payload bytes without
    /// growing.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut data = BytesMut::with_capacity(HEADER_RESERVE + capacity);
        data.resize(HEADER_RESERVE + capacity, 0);
        Self {
            data,
            begin: HEADER_RESERVE,
            pos: HEADER_RESERVE,
            len: 0,
        }
    }

    /// Create a read-only view over a received payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut buf = Self::with_capacity(payload.len());
        buf.push_raw(payload);
        buf
    }

    /// Drop all content. Capacity is kept.
    pub fn reset(&mut self) {
        self.begin = HEADER_RESERVE;
        self.pos = HEADER_RESERVE;
        self.len = 0;
    }

    /// Payload length in bytes (including a length prefix once calculated).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read cursor relative to the payload start.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos - self.begin
    }

    /// Bytes left between the read cursor and the end of the payload.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.begin + self.len - self.pos
    }

    /// Move the read cursor back to the payload start.
    #[inline]
    pub fn rewind(&mut self) {
        self.pos = self.begin;
    }

    /// Current backing capacity (including the reserved header space).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Payload bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.begin..self.begin + self.len]
    }

    /// Copy the payload into an immutable `Bytes` for the writer task.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_bytes())
    }

    fn end(&self) -> usize {
        self.begin + self.len
    }

    /// Ensure room for `extra` more bytes after the payload.
    fn reserve(&mut self, extra: usize) {
        let needed = self.end() + extra;
        if needed <= self.data.len() {
            return;
        }
        let mut new_size = self.data.len().max(INITIAL_CAPACITY) * 2;
        while new_size < needed {
            new_size *= 2;
        }
        self.data.resize(new_size, 0);
    }

    fn append(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        let end = self.end();
        self.data[end..end + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    /// Append a varint. Values outside `i32` use the arbitrary precision path.
    pub fn push_int(&mut self, value: impl Into<WireInt>) {
        match value.into() {
            WireInt::Native(v) => {
                let (bytes, n) = encode_u64(v < 0, (v as i64).unsigned_abs());
                self.append(&bytes[..n]);
            }
            WireInt::Big {
                negative,
                magnitude,
            } => {
                let bytes = encode_magnitude(negative, &magnitude);
                self.append(&bytes);
            }
        }
    }

    /// Append a boolean as varint 0 or 1.
    pub fn push_bool(&mut self, value: bool) {
        self.push_int(value as i32);
    }

    /// Read a varint.
    ///
    /// Fails if the buffer ends before a terminating byte.
    pub fn pull_int(&mut self) -> Result<WireInt> {
        let available = &self.data[self.pos..self.end()];
        let (n, value) = varint_extent(available)
            .and_then(|n| decode_varint(&available[..n]).map(|value| (n, value)))
            .ok_or_else(|| LinkError::decode("Unexpected end of buffer while reading integer"))?;
        self.pos += n;
        Ok(value)
    }

    /// Read a varint that must fit `i32`.
    pub fn pull_i32(&mut self) -> Result<i32> {
        let value = self.pull_int()?;
        value
            .to_i32()
            .ok_or_else(|| LinkError::decode(format!("Integer {} does not fit 32 bits", value)))
    }

    /// Read a varint that must fit `i64`.
    pub fn pull_i64(&mut self) -> Result<i64> {
        let value = self.pull_int()?;
        value
            .to_i64()
            .ok_or_else(|| LinkError::decode(format!("Integer {} does not fit 64 bits", value)))
    }

    /// Read a boolean (any non-zero value is true).
    pub fn pull_bool(&mut self) -> Result<bool> {
        Ok(self.pull_i32()? != 0)
    }

    /// Read a non-negative length.
    pub fn pull_len(&mut self) -> Result<usize> {
        let n = self.pull_i64()?;
        usize::try_from(n).map_err(|_| LinkError::decode(format!("Negative length {}", n)))
    }

    /// Append raw bytes.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.append(bytes);
    }

    /// Read exactly `n` raw bytes.
    pub fn pull_raw(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(LinkError::decode(format!(
                "Cannot read {} bytes, only {} available",
                n,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.data[start..start + n])
    }

    /// Append a length-prefixed byte value.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.push_int(bytes.len());
        self.push_raw(bytes);
    }

    /// Read a length-prefixed byte value.
    pub fn pull_bytes(&mut self) -> Result<Bytes> {
        let n = self.pull_len()?;
        Ok(Bytes::copy_from_slice(self.pull_raw(n)?))
    }

    /// Append a length-prefixed UTF-8 string.
    ///
    /// An empty string is encoded as length 0, which is also what peers send
    /// for an absent string.
    pub fn push_string(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn pull_string(&mut self) -> Result<String> {
        let n = self.pull_len()?;
        let raw = self.pull_raw(n)?;
        String::from_utf8(raw.to_vec()).map_err(|e| LinkError::decode(format!("Invalid UTF-8: {}", e)))
    }

    /// Append an optional string with an explicit presence flag.
    pub fn push_nullable_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.push_bool(true);
                self.push_string(s);
            }
            None => self.push_bool(false),
        }
    }

    /// Read an optional string written by [`FrameBuffer::push_nullable_string`].
    pub fn pull_nullable_string(&mut self) -> Result<Option<String>> {
        if self.pull_bool()? {
            self.pull_string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Append an IEEE-754 double, big-endian.
    pub fn push_double(&mut self, value: f64) {
        self.append(&value.to_be_bytes());
    }

    /// Read an IEEE-754 double, big-endian.
    pub fn pull_double(&mut self) -> Result<f64> {
        let raw = self.pull_raw(8)?;
        let mut be = [0u8; 8];
        be.copy_from_slice(raw);
        Ok(f64::from_be_bytes(be))
    }

    /// Write the varint payload length immediately before the payload.
    pub fn calculate_length(&mut self) -> Result<()> {
        let (bytes, n) = encode_u64(false, self.len as u64);
        if self.begin < n {
            return Err(LinkError::Protocol(format!(
                "No room for a {} byte length prefix",
                n
            )));
        }
        self.begin -= n;
        self.len += n;
        self.data[self.begin..self.begin + n].copy_from_slice(&bytes[..n]);
        Ok(())
    }

    /// Check whether a complete frame sits at the start of the buffer.
    ///
    /// The read cursor is restored afterwards. An incomplete length prefix
    /// means "not yet"; a negative length is an error.
    pub fn is_message(&mut self) -> Result<bool> {
        Ok(self.frame_extent()?.is_some())
    }

    /// Total size (prefix + payload) of the leading frame, if complete.
    pub(crate) fn frame_extent(&mut self) -> Result<Option<usize>> {
        let saved = self.pos;
        self.pos = self.begin;
        let peeked = self.pull_int();
        let prefix = self.pos - self.begin;
        self.pos = saved;

        let length = match peeked {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        if length.is_negative() {
            return Err(LinkError::Protocol(format!(
                "Negative frame length {}",
                length
            )));
        }
        let length = length
            .to_i64()
            .and_then(|l| usize::try_from(l).ok())
            .ok_or_else(|| LinkError::Protocol(format!("Frame length {} too large", length)))?;

        if prefix + length <= self.len {
            Ok(Some(prefix + length))
        } else {
            Ok(None)
        }
    }

    /// Remove the leading frame, shifting the remainder to the front.
    ///
    /// Does nothing if no complete frame is present.
    pub fn cut_message(&mut self) -> Result<()> {
        let Some(extent) = self.frame_extent()? else {
            return Ok(());
        };
        let from = self.begin + extent;
        let to = self.end();
        self.data.copy_within(from..to, self.begin);
        self.len -= extent;
        self.pos = self.begin;
        Ok(())
    }

    /// Free space after the payload for a direct socket read.
    ///
    /// At least `READ_SLACK` bytes are available.
    pub fn get_end(&mut self) -> &mut [u8] {
        if self.data.len() - self.end() < READ_SLACK {
            self.reserve(READ_SLACK);
        }
        let end = self.end();
        &mut self.data[end..]
    }

    /// Account for `n` bytes written into the slice returned by `get_end`.
    pub fn increase_length(&mut self, n: usize) -> Result<()> {
        if self.end() + n > self.data.len() {
            return Err(LinkError::Protocol(format!(
                "Length increase of {} exceeds buffer capacity",
                n
            )));
        }
        self.len += n;
        Ok(())
    }

    /// Append freshly received bytes through `get_end`/`increase_length`.
    pub fn push_received(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let free = self.get_end();
            let n = free.len().min(data.len());
            free[..n].copy_from_slice(&data[..n]);
            self.len += n;
            data = &data[n..];
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("begin", &self.begin)
            .field("pos", &self.pos)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(build: impl FnOnce(&mut FrameBuffer)) -> Vec<u8> {
        let mut buf = FrameBuffer::new();
        build(&mut buf);
        buf.calculate_length().unwrap();
        buf.as_bytes().to_vec()
    }

    #[test]
    fn test_int_roundtrip_wide_range() {
        let mut buf = FrameBuffer::new();
        let values: Vec<i128> = vec![
            0,
            1,
            -1,
            63,
            64,
            -8192,
            i32::MAX as i128,
            i32::MIN as i128,
            i64::MAX as i128 + 1,
            i64::MIN as i128 - 12345,
            i128::MAX,
        ];
        for v in &values {
            buf.push_int(*v);
        }
        for v in &values {
            assert_eq!(buf.pull_int().unwrap().to_i128(), Some(*v));
        }
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_pull_int_exhausted() {
        let mut buf = FrameBuffer::new();
        buf.push_raw(&[0x80, 0x81]);
        let err = buf.pull_int().unwrap_err();
        assert!(matches!(err, LinkError::Decode(_)));
        // Cursor did not move.
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_string_roundtrip_and_null_ambiguity() {
        let mut buf = FrameBuffer::new();
        buf.push_string("hello");
        buf.push_string("");
        buf.push_string("ünï");
        assert_eq!(buf.pull_string().unwrap(), "hello");
        assert_eq!(buf.pull_string().unwrap(), "");
        assert_eq!(buf.pull_string().unwrap(), "ünï");

        // An "absent" string from a peer is just length 0: indistinguishable.
        let mut absent = FrameBuffer::new();
        absent.push_int(0);
        let mut empty = FrameBuffer::new();
        empty.push_string("");
        assert_eq!(absent.as_bytes(), empty.as_bytes());
    }

    #[test]
    fn test_nullable_string_presence_flag() {
        let mut buf = FrameBuffer::new();
        buf.push_nullable_string(None);
        buf.push_nullable_string(Some(""));
        assert_eq!(buf.pull_nullable_string().unwrap(), None);
        assert_eq!(buf.pull_nullable_string().unwrap(), Some(String::new()));
    }

    #[test]
    fn test_negative_string_length_rejected() {
        let mut buf = FrameBuffer::new();
        buf.push_int(-3);
        assert!(buf.pull_string().is_err());
    }

    #[test]
    fn test_pull_raw_past_end() {
        let mut buf = FrameBuffer::new();
        buf.push_raw(b"abc");
        assert!(buf.pull_raw(4).is_err());
        assert_eq!(buf.pull_raw(3).unwrap(), b"abc");
    }

    #[test]
    fn test_double_big_endian() {
        let mut buf = FrameBuffer::new();
        buf.push_double(1.5);
        assert_eq!(buf.as_bytes(), &1.5f64.to_be_bytes());
        assert_eq!(buf.pull_double().unwrap(), 1.5);
    }

    #[test]
    fn test_calculate_length_prepends_prefix() {
        let bytes = framed(|b| b.push_raw(&[7u8; 100]));
        // 100 needs two varint bytes: 0x80 | (100 >> 7), 100 & 0x7F
        assert_eq!(&bytes[..2], &[0x80, 0x64]);
        assert_eq!(bytes.len(), 102);
    }

    #[test]
    fn test_is_message_then_cut() {
        let first = framed(|b| b.push_string("first"));
        let second = framed(|b| b.push_int(99));

        let mut buf = FrameBuffer::new();
        buf.push_received(&first);
        buf.push_received(&second[..1]);

        assert!(buf.is_message().unwrap());
        assert_eq!(buf.position(), 0);
        buf.cut_message().unwrap();
        assert_eq!(buf.as_bytes(), &second[..1]);
        assert!(!buf.is_message().unwrap());

        buf.push_received(&second[1..]);
        assert!(buf.is_message().unwrap());
        buf.cut_message().unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_cut_without_message_is_noop() {
        let mut buf = FrameBuffer::new();
        buf.push_raw(&[5, 1, 2]);
        buf.cut_message().unwrap();
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_negative_frame_length_is_error() {
        let mut buf = FrameBuffer::new();
        buf.push_int(-5);
        assert!(matches!(buf.is_message(), Err(LinkError::Protocol(_))));
    }

    #[test]
    fn test_get_end_guarantees_slack() {
        let mut buf = FrameBuffer::with_capacity(10);
        let free = buf.get_end().len();
        assert!(free >= READ_SLACK);
        buf.get_end()[..3].copy_from_slice(b"xyz");
        buf.increase_length(3).unwrap();
        assert_eq!(buf.as_bytes(), b"xyz");
    }

    #[test]
    fn test_increase_length_beyond_capacity() {
        let mut buf = FrameBuffer::new();
        let cap = buf.capacity();
        assert!(buf.increase_length(cap).is_err());
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut buf = FrameBuffer::new();
        buf.push_raw(&vec![1u8; 10_000]);
        let grown = buf.capacity();
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), grown);
    }

    #[test]
    fn test_large_payload_grows() {
        let payload = vec![0xAB; 1024 * 1024];
        let bytes = framed(|b| b.push_raw(&payload));
        let mut buf = FrameBuffer::new();
        buf.push_received(&bytes);
        assert!(buf.is_message().unwrap());
    }
}
