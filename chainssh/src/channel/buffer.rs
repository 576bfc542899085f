//! Bounded accumulation buffer for one chunk of shell output.

use bytes::BytesMut;

use crate::error::ChannelError;

/// Default buffer capacity: 65 KiB.
pub const DEFAULT_CAPACITY: usize = 65 * 1024;

/// Buffer accumulating raw output across reads until a prompt is seen.
///
/// The capacity is a hard limit. Output that grows past it without a prompt
/// is reported as [`ChannelError::BufferOverflow`] instead of being
/// truncated, since the chunk boundary is lost at that point.
#[derive(Debug)]
pub struct ChunkBuffer {
    buffer: BytesMut,
    capacity: usize,
}

impl ChunkBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if self.buffer.len() + data.len() > self.capacity {
            return Err(ChannelError::BufferOverflow {
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Take the accumulated chunk as text (lossy UTF-8) and reset.
    pub fn take_text(&mut self) -> String {
        let chunk = self.buffer.split().freeze();
        String::from_utf8_lossy(&chunk).into_owned()
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of bytes a chunk may hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_across_reads() {
        let mut buffer = ChunkBuffer::default();
        buffer.extend(b"pi\r\n").unwrap();
        buffer.extend(b"0\r\n$ ").unwrap();
        assert_eq!(buffer.as_slice(), b"pi\r\n0\r\n$ ");
        assert_eq!(buffer.len(), 9);
    }

    #[test]
    fn test_take_text_resets() {
        let mut buffer = ChunkBuffer::new(64);
        buffer.extend(b"/tmp\r\n$ ").unwrap();
        assert_eq!(buffer.take_text(), "/tmp\r\n$ ");
        assert!(buffer.is_empty());

        buffer.extend(b"next").unwrap();
        assert_eq!(buffer.take_text(), "next");
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut buffer = ChunkBuffer::new(8);
        buffer.extend(b"12345678").unwrap();
        let err = buffer.extend(b"9").unwrap_err();
        assert!(matches!(err, ChannelError::BufferOverflow { capacity: 8 }));
        // Contents are left untouched.
        assert_eq!(buffer.as_slice(), b"12345678");
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let mut buffer = ChunkBuffer::new(16);
        buffer.extend(&[b'a', 0xff, b'$', b' ']).unwrap();
        assert_eq!(buffer.take_text(), "a\u{fffd}$ ");
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(ChunkBuffer::default().capacity(), 66_560);
    }
}
