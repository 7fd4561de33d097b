use alloc::boxed::Box;
use alloc::vec;

/// A fixed capacity ring buffer of octets.
///
/// Bytes are appended at the back and consumed from the front. Bytes can also be read at an
/// offset without consuming them, which the transmit path uses for refilling retransmitted
/// segments from data that is not yet acknowledged.
#[derive(Clone, Debug, Default)]
pub struct RingBuffer {
    storage: Box<[u8]>,
    read_at: usize,
    length: usize,
}

impl RingBuffer {
    /// Create a buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            storage: vec![0; capacity].into_boxed_slice(),
            read_at: 0,
            length: 0,
        }
    }

    /// The total number of octets that can be buffered.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// The number of buffered octets.
    pub fn len(&self) -> usize {
        self.length
    }

    /// The number of octets that can still be enqueued.
    pub fn window(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Check if no more octets can be enqueued.
    pub fn is_full(&self) -> bool {
        self.window() == 0
    }

    /// Forget all buffered octets.
    pub fn clear(&mut self) {
        self.read_at = 0;
        self.length = 0;
    }

    fn clamp_writer(&self, mut size: usize) -> (usize, usize) {
        if self.capacity() == 0 {
            return (0, 0);
        }
        let write_at = (self.read_at + self.length) % self.capacity();
        // We can't enqueue more than there is free space.
        size = size.min(self.window());
        // We can't contiguously enqueue past the end of the storage.
        let until_end = self.capacity() - write_at;
        (write_at, size.min(until_end))
    }

    fn clamp_reader(&self, offset: usize, mut size: usize) -> (usize, usize) {
        if self.capacity() == 0 || offset > self.length {
            return (0, 0);
        }
        let read_at = (self.read_at + offset) % self.capacity();
        // We can't read past the end of the queued data.
        size = size.min(self.length - offset);
        // We can't contiguously read past the end of the storage.
        let until_end = self.capacity() - read_at;
        (read_at, size.min(until_end))
    }

    /// Append as much of `data` as fits, returning the number of octets enqueued.
    pub fn enqueue_slice(&mut self, mut data: &[u8]) -> usize {
        let mut total = 0;
        // At most two rounds, in case we hit the wraparound.
        for _ in 0..2 {
            let (write_at, size) = self.clamp_writer(data.len());
            if size == 0 {
                break;
            }
            self.storage[write_at..write_at + size].copy_from_slice(&data[..size]);
            self.length += size;
            total += size;
            data = &data[size..];
        }
        total
    }

    /// Copy octets starting `offset` bytes after the front into `buf`, without consuming them.
    ///
    /// Returns the number of octets copied, which is smaller than the buffer when not enough
    /// octets are buffered.
    pub fn read_at(&self, mut offset: usize, buf: &mut [u8]) -> usize {
        let mut total = 0;
        for _ in 0..2 {
            let (read_at, size) = self.clamp_reader(offset, buf.len() - total);
            if size == 0 {
                break;
            }
            buf[total..total + size].copy_from_slice(&self.storage[read_at..read_at + size]);
            total += size;
            offset += size;
        }
        total
    }

    /// Consume octets from the front into `buf`, returning the number of octets dequeued.
    pub fn dequeue_slice(&mut self, buf: &mut [u8]) -> usize {
        let size = self.read_at(0, buf);
        self.discard(size);
        size
    }

    /// Drop up to `size` octets from the front, returning the number of octets dropped.
    pub fn discard(&mut self, size: usize) -> usize {
        let size = size.min(self.length);
        if size > 0 {
            self.read_at = (self.read_at + size) % self.capacity();
            self.length -= size;
        }
        size
    }
}
