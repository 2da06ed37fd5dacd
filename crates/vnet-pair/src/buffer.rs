use core::fmt;

use crate::endpoint::EndpointId;

/// Largest frame a buffer can hold: a 1500-byte payload plus the 14-byte Ethernet header.
pub const MAX_FRAME: usize = 1514;

/// A fixed-capacity frame buffer drawn from an endpoint's [`BufferPool`](crate::BufferPool).
///
/// Buffers are never cloned. Moving one between the pool, a receive queue and the upper layer is
/// the only way to hand it off, so a buffer can never sit on two lists at once. The `(owner, slot,
/// epoch)` tag lets the owning pool reject buffers that do not belong to it.
pub struct FrameBuffer {
    owner: EndpointId,
    slot: u16,
    epoch: u32,
    len: usize,
    data: Box<[u8; MAX_FRAME]>,
}

impl FrameBuffer {
    pub(crate) fn new(owner: EndpointId, slot: u16, epoch: u32) -> Self {
        Self {
            owner,
            slot,
            epoch,
            len: 0,
            data: Box::new([0u8; MAX_FRAME]),
        }
    }

    /// Endpoint whose pool this buffer must return to.
    pub fn owner(&self) -> EndpointId {
        self.owner
    }

    pub fn slot(&self) -> u16 {
        self.slot
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The frame bytes currently stored in the buffer.
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Copy `frame` into the buffer. Callers validate the length against [`MAX_FRAME`] first.
    pub(crate) fn fill(&mut self, frame: &[u8]) {
        debug_assert!(frame.len() <= MAX_FRAME);
        let len = frame.len().min(MAX_FRAME);
        self.data[..len].copy_from_slice(&frame[..len]);
        self.len = len;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("owner", &self.owner)
            .field("slot", &self.slot)
            .field("epoch", &self.epoch)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}
