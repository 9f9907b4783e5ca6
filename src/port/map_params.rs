//! Parameters exchanged with map and unmap operations.

use crate::error::{LinkError, Result};
use crate::protocol::FrameBuffer;

/// Fixed-length sequence of opaque string values.
///
/// The length is set at construction. Every access is bounds-checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapParams {
    values: Vec<String>,
}

impl MapParams {
    /// Create `len` empty parameters.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![String::new(); len],
        }
    }

    /// Create from existing values; the length is fixed from here on.
    pub fn from_values(values: Vec<String>) -> Self {
        Self { values }
    }

    /// Number of parameters.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no parameters.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read the parameter at `index`.
    pub fn get(&self, index: usize) -> Result<&str> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or(LinkError::IndexOutOfBounds {
                index,
                len: self.values.len(),
            })
    }

    /// Overwrite the parameter at `index`.
    pub fn set(&mut self, index: usize, value: impl Into<String>) -> Result<()> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(LinkError::IndexOutOfBounds { index, len })?;
        *slot = value.into();
        Ok(())
    }

    /// Iterate over the values in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// `int(count)` followed by `count` strings.
    pub fn encode(&self, buf: &mut FrameBuffer) {
        buf.push_int(self.values.len());
        for value in &self.values {
            buf.push_string(value);
        }
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode(buf: &mut FrameBuffer) -> Result<Self> {
        let count = buf.pull_len()?;
        let mut values = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            values.push(buf.pull_string()?);
        }
        Ok(Self { values })
    }
}
