//! Bounded ASCII stream identifier.
//!
//! A fixed-size, `Copy` POD value so it can live directly inside a ring
//! slot without allocation. The payload is text, so a length byte rides
//! alongside the fixed buffer.

use std::fmt;
use std::str::FromStr;

/// Maximum stream key length in bytes.
pub const STREAM_KEY_MAX: usize = 60;

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    bytes: [u8; STREAM_KEY_MAX],
    len: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamKeyError {
    #[error("stream key too long: {0} bytes (max {STREAM_KEY_MAX})")]
    TooLong(usize),
    #[error("stream key contains non-ASCII or control bytes")]
    NotAscii,
}

impl StreamKey {
    pub fn empty() -> Self {
        Self {
            bytes: [0u8; STREAM_KEY_MAX],
            len: 0,
        }
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: construction only accepts validated ASCII.
        unsafe { std::str::from_utf8_unchecked(&self.bytes[..self.len as usize]) }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > STREAM_KEY_MAX {
            return Err(StreamKeyError::TooLong(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_graphic() || b == b'_') {
            return Err(StreamKeyError::NotAscii);
        }
        let mut bytes = [0u8; STREAM_KEY_MAX];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self {
            bytes,
            len: s.len() as u8,
        })
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamKey").field(&self.as_str()).finish()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for StreamKey {
    fn default() -> Self {
        Self::empty()
    }
}
