//! Per-connection byte buffers.
//!
//! `ReadBuffer` has a fixed capacity of one header plus one maximum-size
//! message. Consumed frames are compacted away so the buffer never grows,
//! however many pipelined requests arrive back-to-back.
//!
//! `WriteBuffer` holds queued reply bytes and tracks how many have been
//! sent, so a partial write resumes from the right offset.

/// Bounded accumulation buffer for bytes read from a peer.
#[derive(Debug)]
pub struct ReadBuffer {
    /// Backing storage, allocated once at full capacity.
    buf: Box<[u8]>,
    /// Number of valid bytes at the front of `buf`.
    filled: usize,
}

impl ReadBuffer {
    /// Create an empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Valid bytes accumulated so far.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Unused tail of the buffer, ready to be read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.filled..]
    }

    /// Mark `n` bytes of the spare region as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.filled + n <= self.buf.len(), "commit past capacity");
        self.filled = (self.filled + n).min(self.buf.len());
    }

    /// Discard `n` leading bytes and move the remainder to the front.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.filled);
        if n < self.filled {
            self.buf.copy_within(n..self.filled, 0);
        }
        self.filled -= n;
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// True when no spare room remains.
    pub fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    /// Maximum number of bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Outgoing bytes plus the offset of the first unsent byte.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    buf: Vec<u8>,
    written: usize,
}

impl WriteBuffer {
    /// Create an empty write buffer with `capacity` preallocated.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            written: 0,
        }
    }

    /// Mutable access to the queue for appending encoded frames.
    pub fn queue(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Bytes still waiting to be sent.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.written..]
    }

    /// Record that `n` more bytes were sent.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.written + n <= self.buf.len(), "advance past end");
        self.written = (self.written + n).min(self.buf.len());
    }

    /// True once every queued byte has been sent.
    pub fn is_drained(&self) -> bool {
        self.written == self.buf.len()
    }

    /// Bytes sent so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Total bytes queued, sent or not.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Empty the queue and rewind the offset. Keeps the allocation.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.written = 0;
    }
}
