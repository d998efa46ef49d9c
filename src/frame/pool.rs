use std::collections::VecDeque;

/// Pixel storage released by evicted frames, kept for the next copy.
pub(crate) struct FramePool {
    buffers: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Put a buffer back to the pool after its frame was evicted.
    ///
    /// When the pool is full the smallest buffer gives way to a larger one, so
    /// the pool follows the stream after its resolution grows.
    pub fn put(&mut self, buffer: Vec<u8>) {
        if self.buffers.len() < self.capacity {
            self.buffers.push_back(buffer);
            return;
        }

        let smallest = self
            .buffers
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.capacity())
            .map(|(pos, b)| (pos, b.capacity()));
        if let Some((pos, capacity)) = smallest {
            if capacity < buffer.capacity() {
                self.buffers.remove(pos);
                self.buffers.push_back(buffer);
            }
        }
    }

    /// Take a buffer able to hold `len` bytes or allocate a new one if necessary.
    pub fn take(&mut self, len: usize) -> Vec<u8> {
        if let Some(pos) = self.buffers.iter().position(|b| b.capacity() >= len) {
            if let Some(buffer) = self.buffers.remove(pos) {
                return buffer;
            }
        }
        Vec::with_capacity(len)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }
}
