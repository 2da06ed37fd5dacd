//! The upper-layer side of the receive path.

use std::sync::{Arc, Mutex};

use crate::endpoint::EndpointId;

/// Outcome of handing a received frame to the upper layer.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The upper layer took the frame. The buffer stays out of the pool until the receiving
    /// endpoint calls [`EndpointPair::complete_rx`](crate::EndpointPair::complete_rx).
    Accepted,
    /// The upper layer could not take the frame (e.g. no memory). It is counted in `rx_dropped`
    /// and its buffer goes straight back to the sender.
    Dropped,
}

/// Receives frames as they arrive on an endpoint.
///
/// Called from inside the sender's [`EndpointPair::submit_transmit`] (or from
/// [`EndpointPair::poll_rx`]) with no endpoint lock held, so implementations may submit frames of
/// their own. They must not block.
///
/// [`EndpointPair::submit_transmit`]: crate::EndpointPair::submit_transmit
/// [`EndpointPair::poll_rx`]: crate::EndpointPair::poll_rx
pub trait FrameSink: Send + Sync {
    fn on_frame_received(&self, endpoint: EndpointId, frame: &[u8]) -> Delivery;
}

/// Accepts and discards everything.
impl FrameSink for () {
    fn on_frame_received(&self, _endpoint: EndpointId, _frame: &[u8]) -> Delivery {
        Delivery::Accepted
    }
}

impl<F> FrameSink for F
where
    F: Fn(EndpointId, &[u8]) -> Delivery + Send + Sync,
{
    fn on_frame_received(&self, endpoint: EndpointId, frame: &[u8]) -> Delivery {
        self(endpoint, frame)
    }
}

impl<T: FrameSink + ?Sized> FrameSink for Arc<T> {
    fn on_frame_received(&self, endpoint: EndpointId, frame: &[u8]) -> Delivery {
        <T as FrameSink>::on_frame_received(&**self, endpoint, frame)
    }
}

/// A sink that copies every frame it accepts, for tests and tooling.
#[derive(Debug, Default)]
pub struct FrameLog {
    frames: Mutex<Vec<(EndpointId, Vec<u8>)>>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return everything received so far, in arrival order.
    pub fn take(&self) -> Vec<(EndpointId, Vec<u8>)> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(EndpointId, Vec<u8>)>> {
        self.frames
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for FrameLog {
    fn on_frame_received(&self, endpoint: EndpointId, frame: &[u8]) -> Delivery {
        self.lock().push((endpoint, frame.to_vec()));
        Delivery::Accepted
    }
}
