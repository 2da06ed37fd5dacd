use std::collections::VecDeque;

use crate::buffer::FrameBuffer;

/// Frames waiting to be handed to an endpoint's upper layer, oldest first.
#[derive(Debug, Default)]
pub struct RxQueue {
    frames: VecDeque<FrameBuffer>,
}

impl RxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, buf: FrameBuffer) {
        self.frames.push_back(buf);
    }

    pub fn dequeue(&mut self) -> Option<FrameBuffer> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = FrameBuffer> + '_ {
        self.frames.drain(..)
    }
}
