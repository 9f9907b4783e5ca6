//! Scoped access to one complete frame of an incoming buffer.
//!
//! A [`FrameGuard`] positions the read cursor just after the length prefix
//! and removes the frame from the buffer when dropped, whether decoding
//! succeeded or not. A malformed frame therefore never desynchronizes the
//! stream.
//!
//! # Example
//!
//! ```
//! use mctr_link::protocol::{FrameBuffer, FrameGuard};
//!
//! let mut out = FrameBuffer::new();
//! out.push_int(7);
//! out.calculate_length().unwrap();
//!
//! let mut incoming = FrameBuffer::new();
//! incoming.push_received(out.as_bytes());
//! {
//!     let mut frame = FrameGuard::next(&mut incoming).unwrap().unwrap();
//!     assert_eq!(frame.pull_i32().unwrap(), 7);
//! }
//! assert!(incoming.is_empty());
//! ```

use std::ops::{Deref, DerefMut};

use bytes::Bytes;

use super::FrameBuffer;
use crate::error::{LinkError, Result};

/// One complete frame borrowed from an incoming buffer.
pub struct FrameGuard<'a> {
    buf: &'a mut FrameBuffer,
    /// Frame end relative to the payload start of `buf`.
    frame_end: usize,
}

impl<'a> FrameGuard<'a> {
    /// Borrow the leading frame, if one is complete.
    ///
    /// Fails only on a negative length prefix.
    pub fn next(buf: &'a mut FrameBuffer) -> Result<Option<Self>> {
        let Some(extent) = buf.frame_extent()? else {
            return Ok(None);
        };
        buf.rewind();
        // Complete by construction: frame_extent parsed this prefix.
        buf.pull_int()?;
        Ok(Some(Self {
            buf,
            frame_end: extent,
        }))
    }

    /// Bytes left until the frame boundary.
    #[inline]
    pub fn remaining_in_frame(&self) -> usize {
        self.frame_end.saturating_sub(self.buf.position())
    }

    /// Take every byte up to the frame boundary.
    pub fn rest(&mut self) -> Result<Bytes> {
        let n = self.remaining_in_frame();
        Ok(Bytes::copy_from_slice(self.buf.pull_raw(n)?))
    }

    /// Check that decoding stopped exactly at the frame boundary.
    pub fn finish(&self) -> Result<()> {
        let pos = self.buf.position();
        if pos > self.frame_end {
            return Err(LinkError::decode(format!(
                "Decoder read {} bytes past the frame boundary",
                pos - self.frame_end
            )));
        }
        if pos < self.frame_end {
            return Err(LinkError::decode(format!(
                "{} unprocessed bytes at the end of the frame",
                self.frame_end - pos
            )));
        }
        Ok(())
    }
}

impl Deref for FrameGuard<'_> {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        &*self.buf
    }
}

impl DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        &mut *self.buf
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.buf.cut_message() {
            tracing::error!("Failed to cut frame: {}", e);
        }
    }
}

/// Build a complete frame: `varint(len) | varint(opcode) | body`.
pub fn build_frame(opcode: i32, body: impl FnOnce(&mut FrameBuffer)) -> Result<FrameBuffer> {
    let mut buf = FrameBuffer::new();
    buf.push_int(opcode);
    body(&mut buf);
    buf.calculate_length()?;
    Ok(buf)
}
