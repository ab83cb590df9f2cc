#![forbid(unsafe_code)]

//! Growable octet buffer owned by each transform instance.

/// A growable byte buffer with head-trim and data-set operations.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Append bytes to the end of the buffer.
    pub fn append(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    /// Replace the buffer contents.
    pub fn set_data(&mut self, src: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(src);
    }

    /// Remove `n` bytes from the head, shifting the remainder to the front.
    /// Removing more than the current length empties the buffer.
    pub fn remove_head(&mut self, n: usize) {
        if n >= self.data.len() {
            self.data.clear();
        } else {
            self.data.drain(..n);
        }
    }

    /// Current contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Take the contents out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Consume the buffer, returning the contents.
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_remove_head() {
        let mut buf = Buffer::new();
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.data(), b"hello world");

        buf.remove_head(6);
        assert_eq!(buf.data(), b"world");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_remove_head_past_end() {
        let mut buf = Buffer::from(b"abc".to_vec());
        buf.remove_head(10);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_set_data_replaces() {
        let mut buf = Buffer::from(b"old".to_vec());
        buf.set_data(b"new contents");
        assert_eq!(buf.data(), b"new contents");
    }

    #[test]
    fn test_take_empties() {
        let mut buf = Buffer::from(b"xyz".to_vec());
        let taken = buf.take();
        assert_eq!(taken, b"xyz");
        assert!(buf.is_empty());
    }
}
