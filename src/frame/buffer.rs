//! Append-only receive buffer for the serial byte stream.

/// Accumulates raw bytes read from the detector until complete frames can be
/// carved out of them.
///
/// The buffer has no protocol knowledge; it only stores bytes and supports
/// the search/trim operations the link's framing loop needs. The detector
/// link owns exactly one of these and mutates it only from its own task.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Offset of the first occurrence of `pattern`, if present.
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() || self.data.len() < pattern.len() {
            return None;
        }
        self.data.windows(pattern.len()).position(|w| w == pattern)
    }

    /// Discard the first `count` bytes (all of them if fewer are buffered).
    pub fn drain(&mut self, count: usize) {
        let count = count.min(self.data.len());
        self.data.drain(..count);
    }

    /// Remove and return the first `count` bytes (all of them if fewer are
    /// buffered).
    pub fn take(&mut self, count: usize) -> Vec<u8> {
        let count = count.min(self.data.len());
        self.data.drain(..count).collect()
    }

    /// Retain at most the last `count` bytes.
    pub fn keep_tail(&mut self, count: usize) {
        if self.data.len() > count {
            let cut = self.data.len() - count;
            self.data.drain(..cut);
        }
    }

    /// View of the buffered bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_and_take_preserve_order() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"abc");
        buf.extend(b"def");
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.take(4), b"abcd");
        assert_eq!(buf.as_slice(), b"ef");
    }

    #[test]
    fn find_returns_first_occurrence() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"xxUUD0yyUUD0");
        assert_eq!(buf.find(b"UUD0"), Some(2));
        assert_eq!(buf.find(b"GD"), None);
    }

    #[test]
    fn find_handles_pattern_longer_than_buffer() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"UU");
        assert_eq!(buf.find(b"UUD0"), None);
    }

    #[test]
    fn drain_and_keep_tail_clamp_to_contents() {
        let mut buf = FrameBuffer::new();
        buf.extend(b"123456");
        buf.drain(2);
        assert_eq!(buf.as_slice(), b"3456");
        buf.keep_tail(3);
        assert_eq!(buf.as_slice(), b"456");
        buf.keep_tail(10);
        assert_eq!(buf.as_slice(), b"456");
        buf.drain(100);
        assert!(buf.is_empty());
    }
}
