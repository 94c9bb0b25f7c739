//! Bounded ring buffer of recent sample blocks for pre-trigger history.
//!
//! While the controller is armed and waiting for a trigger, every incoming
//! block is pushed here. The buffer holds at most `capacity` blocks; pushing
//! into a full buffer evicts the oldest block first. When the trigger fires,
//! the whole buffer is drained oldest-first into the new recording session so
//! the file captures the signal immediately preceding the trigger.

use std::collections::VecDeque;

use crate::core::SampleBlock;

/// Bounded FIFO of recent blocks; oldest evicted first.
#[derive(Debug)]
pub struct PreTriggerBuffer {
    blocks: VecDeque<SampleBlock>,
    capacity: usize,
}

impl PreTriggerBuffer {
    /// Buffer holding at most `capacity` blocks. A zero capacity is clamped
    /// to one so a fired trigger always captures at least the current block.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            blocks: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of blocks retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently buffered. Never exceeds `capacity`.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Push a block, evicting the oldest if the buffer is full.
    pub fn push(&mut self, block: SampleBlock) {
        if self.blocks.len() == self.capacity {
            self.blocks.pop_front();
        }
        self.blocks.push_back(block);
    }

    /// Remove and return all buffered blocks, oldest first.
    pub fn drain(&mut self) -> Vec<SampleBlock> {
        self.blocks.drain(..).collect()
    }

    /// Discard all buffered blocks.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_at(first_timestamp: u32) -> SampleBlock {
        SampleBlock::zeroed(1, first_timestamp)
    }

    #[test]
    fn length_is_bounded_by_capacity() {
        let mut buffer = PreTriggerBuffer::new(4);
        for i in 0..10u32 {
            buffer.push(block_at(i * 60));
            assert_eq!(buffer.len(), usize::min(i as usize + 1, 4));
        }
        assert_eq!(buffer.len(), buffer.capacity());
    }

    #[test]
    fn oldest_evicted_first() {
        let mut buffer = PreTriggerBuffer::new(3);
        for i in 0..5u32 {
            buffer.push(block_at(i * 60));
        }
        let drained = buffer.drain();
        let firsts: Vec<u32> = drained.iter().map(|b| b.timestamps[0]).collect();
        assert_eq!(firsts, vec![120, 180, 240]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let mut buffer = PreTriggerBuffer::new(0);
        buffer.push(block_at(0));
        buffer.push(block_at(60));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain()[0].timestamps[0], 60);
    }

    #[test]
    fn clear_discards_everything() {
        let mut buffer = PreTriggerBuffer::new(2);
        buffer.push(block_at(0));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
