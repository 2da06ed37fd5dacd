//! Per-endpoint free list of [`FrameBuffer`]s.
//!
//! The pool is a fixed array of `capacity` slots. A slot is either occupied (the buffer is free and
//! parked in the pool) or empty (the buffer is out on a queue or with the upper layer). Free slot
//! indices are kept on a LIFO stack, so acquire and release are both O(1).
//!
//! Every buffer carries the epoch of the pool generation it was minted in. [`BufferPool::reset`]
//! throws the whole generation away and mints a fresh one, so buffers still in flight at that point
//! are abandoned and rejected if they ever come back.

use crate::buffer::FrameBuffer;
use crate::endpoint::EndpointId;
use crate::error::PoolError;

#[derive(Debug)]
pub struct BufferPool {
    owner: EndpointId,
    epoch: u32,
    slots: Vec<Option<FrameBuffer>>,
    free: Vec<u16>,
}

impl BufferPool {
    /// Create a full pool of `capacity` buffers owned by `owner`.
    ///
    /// `capacity` is validated by [`PairConfig::validate`](crate::PairConfig::validate) and must fit
    /// in a `u16` slot index.
    pub fn new(owner: EndpointId, capacity: usize) -> Self {
        debug_assert!(capacity <= usize::from(u16::MAX));
        let mut pool = Self {
            owner,
            epoch: 0,
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
        };
        pool.refill(capacity);
        pool
    }

    fn refill(&mut self, capacity: usize) {
        self.slots.clear();
        self.free.clear();
        for slot in 0..capacity {
            let slot = slot as u16;
            self.slots
                .push(Some(FrameBuffer::new(self.owner, slot, self.epoch)));
            // Push in reverse so the first acquire hands out slot 0.
            self.free.push((capacity - 1) as u16 - slot);
        }
    }

    pub fn owner(&self) -> EndpointId {
        self.owner
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffers currently parked in the pool.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of buffers of the current epoch that are out of the pool.
    pub fn outstanding(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Take a buffer out of the pool, or `None` if every buffer is in flight.
    pub fn acquire(&mut self) -> Option<FrameBuffer> {
        let slot = self.free.pop()?;
        let buf = self.slots[usize::from(slot)].take();
        debug_assert!(buf.is_some(), "free list pointed at an empty slot");
        buf
    }

    /// Return a buffer to the slot it was minted in.
    ///
    /// Buffers owned by another endpoint, minted before the last [`reset`](Self::reset), or whose
    /// slot is already occupied are rejected and the pool is left as it was.
    pub fn release(&mut self, mut buf: FrameBuffer) -> Result<(), PoolError> {
        if buf.owner() != self.owner {
            return Err(PoolError::ForeignBuffer {
                owner: buf.owner(),
                pool: self.owner,
            });
        }
        if buf.epoch() != self.epoch {
            return Err(PoolError::StaleBuffer {
                buffer_epoch: buf.epoch(),
                pool_epoch: self.epoch,
            });
        }
        let slot = buf.slot();
        let Some(entry) = self.slots.get_mut(usize::from(slot)) else {
            return Err(PoolError::SlotOutOfRange {
                slot,
                capacity: self.slots.len(),
            });
        };
        if entry.is_some() {
            return Err(PoolError::SlotOccupied { slot });
        }

        buf.clear();
        *entry = Some(buf);
        self.free.push(slot);
        Ok(())
    }

    /// Drop every buffer of the current generation and mint a fresh, full pool.
    ///
    /// Returns how many buffers were out of the pool (and are now abandoned).
    pub fn reset(&mut self) -> usize {
        let abandoned = self.outstanding();
        let capacity = self.capacity();
        self.epoch = self.epoch.wrapping_add(1);
        self.refill(capacity);
        abandoned
    }
}
