//! Growable byte buffer used for receive buffering and outgoing message
//! assembly.
//!
//! Capacity follows a strict doubling law: once non-zero it is always the
//! smallest value of the form `16 * 2^k` that covers the largest logical
//! length requested since the last [`ByteBuf::clear`]. Shrinking the logical
//! length never reallocates; the only compaction is the explicit
//! [`ByteBuf::consume`].

/// Owned, growable byte sequence with amortized doubling growth.
#[derive(Debug, Default)]
pub struct ByteBuf {
    data: Box<[u8]>,
    len: usize,
}

impl ByteBuf {
    /// Smallest non-zero capacity.
    pub const MIN_CAPACITY: usize = 16;

    /// Create an empty buffer with no backing storage.
    pub fn new() -> Self {
        Self {
            data: Box::default(),
            len: 0,
        }
    }

    /// Logical length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The used portion of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Mutable view of the used portion.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    // Smallest doubling-chain capacity covering `needed`.
    fn grown_capacity(current: usize, needed: usize) -> usize {
        let mut cap = if current == 0 {
            Self::MIN_CAPACITY
        } else {
            current
        };
        while cap < needed {
            cap *= 2;
        }
        cap
    }

    /// Set the logical length, growing capacity by the doubling law when
    /// needed. Bytes exposed by growth are zeroed.
    pub fn resize(&mut self, new_len: usize) {
        if new_len > self.data.len() {
            let cap = Self::grown_capacity(self.data.len(), new_len);
            let mut grown = vec![0u8; cap].into_boxed_slice();
            grown[..self.len].copy_from_slice(&self.data[..self.len]);
            self.data = grown;
        } else if new_len > self.len {
            self.data[self.len..new_len].fill(0);
        }
        self.len = new_len;
    }

    /// Append bytes at the tail, growing as needed.
    pub fn append(&mut self, bytes: &[u8]) {
        let orig = self.len;
        self.resize(orig + bytes.len());
        self.data[orig..orig + bytes.len()].copy_from_slice(bytes);
    }

    /// Append another buffer's contents. The source is unchanged.
    pub fn append_buf(&mut self, other: &ByteBuf) {
        self.append(other.as_slice());
    }

    /// Deep copy whose capacity is the smallest doubling-chain value covering
    /// the source's length, not the source's historical capacity.
    pub fn copied_from(src: &ByteBuf) -> Self {
        if src.is_empty() {
            return Self::new();
        }
        let cap = Self::grown_capacity(0, src.len);
        let mut data = vec![0u8; cap].into_boxed_slice();
        data[..src.len].copy_from_slice(src.as_slice());
        Self { data, len: src.len }
    }

    /// Drop the first `n` bytes, compacting the remainder to the front.
    /// Capacity is untouched.
    ///
    /// # Panics
    /// Panics if `n` exceeds the logical length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len, "consume past end of buffer");
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }

    /// Release the backing storage. Idempotent.
    pub fn clear(&mut self) {
        self.data = Box::default();
        self.len = 0;
    }
}
