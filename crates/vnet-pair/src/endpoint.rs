//! One side of the emulated link.
//!
//! All mutable endpoint state (pool, receive queue, delivered-but-unconsumed frames, flags and
//! counters) sits behind a single mutex. Every method takes the lock once, does its work and drops
//! it before returning, so a pool is never observed half-updated and no lock is held while the
//! upper layer runs.

use core::fmt;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::buffer::{FrameBuffer, MAX_FRAME};
use crate::config::{MtuBounds, PairConfig};
use crate::error::{ConfigError, PoolError, TxError};
use crate::fault::LockupInjector;
use crate::frame::{MacAddr, ETH_HLEN, MIN_FRAME_LEN};
use crate::pool::BufferPool;
use crate::queue::RxQueue;
use crate::sink::Delivery;
use crate::stats::EndpointStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EndpointId {
    A,
    B,
}

impl EndpointId {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn peer(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    /// Interface name, as it would appear in `ip link`.
    pub fn name(self) -> &'static str {
        match self {
            Self::A => "vnet0",
            Self::B => "vnet1",
        }
    }

    /// Fixed hardware address. The two addresses differ only in the low bit of the last octet.
    pub fn mac(self) -> MacAddr {
        match self {
            Self::A => MacAddr(*b"\0VNET0"),
            Self::B => MacAddr(*b"\0VNET1"),
        }
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of an endpoint's flags and buffer occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointStatus {
    pub id: EndpointId,
    pub up: bool,
    pub queue_stopped: bool,
    pub rx_enabled: bool,
    pub mtu: usize,
    /// Length of the most recent frame handed to the transmit path.
    pub last_tx_len: usize,
    pub pool_capacity: usize,
    pub pool_available: usize,
    pub pool_epoch: u32,
    /// Frames waiting on this endpoint's receive queue.
    pub rx_queued: usize,
    /// Frames delivered to the upper layer and not yet completed.
    pub rx_held: usize,
    /// Transmit completions swallowed by a simulated lockup.
    pub deferred_completions: u64,
}

/// What [`EndpointPair::transmit_timeout`](crate::EndpointPair::transmit_timeout) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRecovery {
    pub endpoint: EndpointId,
    /// Deferred transmit completions that were delivered.
    pub completed_frames: u64,
    pub completed_bytes: u64,
    /// Buffers that were out of the pool when it was reset and will never return.
    pub abandoned_buffers: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct DeferredCompletions {
    frames: u64,
    bytes: u64,
}

#[derive(Debug)]
struct EndpointState {
    pool: BufferPool,
    rx_queue: RxQueue,
    rx_held: VecDeque<FrameBuffer>,
    stats: EndpointStats,
    up: bool,
    rx_enabled: bool,
    queue_stopped: bool,
    /// Bumped every time the queue goes from running to stopped.
    stop_count: u64,
    mtu: usize,
    last_tx_len: usize,
    deferred: DeferredCompletions,
}

impl EndpointState {
    fn stop_queue(&mut self) {
        if !self.queue_stopped {
            self.queue_stopped = true;
            self.stop_count += 1;
        }
    }
}

#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    mtu_bounds: MtuBounds,
    lockup: LockupInjector,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    /// Create an endpoint that is up, with receive interrupts enabled and a full pool.
    pub fn new(id: EndpointId, config: &PairConfig) -> Self {
        Self {
            id,
            mtu_bounds: config.mtu_bounds,
            lockup: LockupInjector::new(config.lockup_period),
            state: Mutex::new(EndpointState {
                pool: BufferPool::new(id, config.pool_size),
                rx_queue: RxQueue::new(),
                rx_held: VecDeque::new(),
                stats: EndpointStats::default(),
                up: true,
                rx_enabled: true,
                queue_stopped: false,
                stop_count: 0,
                mtu: config.mtu_bounds.max,
                last_tx_len: 0,
                deferred: DeferredCompletions::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EndpointState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn mac(&self) -> MacAddr {
        self.id.mac()
    }

    pub fn stats(&self) -> EndpointStats {
        self.lock().stats
    }

    pub fn status(&self) -> EndpointStatus {
        let state = self.lock();
        EndpointStatus {
            id: self.id,
            up: state.up,
            queue_stopped: state.queue_stopped,
            rx_enabled: state.rx_enabled,
            mtu: state.mtu,
            last_tx_len: state.last_tx_len,
            pool_capacity: state.pool.capacity(),
            pool_available: state.pool.available(),
            pool_epoch: state.pool.epoch(),
            rx_queued: state.rx_queue.len(),
            rx_held: state.rx_held.len(),
            deferred_completions: state.deferred.frames,
        }
    }

    pub fn is_queue_stopped(&self) -> bool {
        self.lock().queue_stopped
    }

    /// Bring the interface up and start its transmit queue.
    ///
    /// A queue stopped by a pending lockup stays stopped until the transmit timeout runs.
    pub fn open(&self) {
        let mut state = self.lock();
        state.up = true;
        if state.deferred.frames == 0 {
            state.queue_stopped = false;
        }
        tracing::debug!(endpoint = %self.id, "opened");
    }

    /// Stop the transmit queue and take the interface down. Frames already queued stay queued.
    pub fn close(&self) {
        let mut state = self.lock();
        state.up = false;
        state.stop_queue();
        tracing::debug!(endpoint = %self.id, "closed");
    }

    pub fn set_rx_interrupts(&self, enabled: bool) {
        self.lock().rx_enabled = enabled;
    }

    pub fn change_mtu(&self, mtu: usize) -> Result<(), ConfigError> {
        self.mtu_bounds.check(mtu)?;
        self.lock().mtu = mtu;
        Ok(())
    }

    /// Validate `frame` and copy it into a buffer from this endpoint's pool.
    ///
    /// Taking the last buffer stops the transmit queue.
    pub(crate) fn begin_transmit(&self, frame: &[u8]) -> Result<FrameBuffer, TxError> {
        let len = frame.len();
        if len < MIN_FRAME_LEN {
            return Err(TxError::FrameTooShort {
                len,
                min: MIN_FRAME_LEN,
            });
        }

        let mut state = self.lock();
        let max = (state.mtu + ETH_HLEN).min(MAX_FRAME);
        if len > max {
            return Err(TxError::FrameTooLong { len, max });
        }
        if !state.up {
            return Err(TxError::Down(self.id));
        }

        let Some(mut buf) = state.pool.acquire() else {
            tracing::debug!(endpoint = %self.id, len, "out of transmit buffers");
            return Err(TxError::OutOfBuffers);
        };
        if state.pool.is_empty() {
            tracing::debug!(endpoint = %self.id, "pool empty, stopping queue");
            state.stop_queue();
        }
        state.last_tx_len = len;
        drop(state);

        buf.fill(frame);
        Ok(buf)
    }

    /// Put a frame on the receive queue. Returns whether receive interrupts are enabled.
    pub(crate) fn enqueue_rx(&self, buf: FrameBuffer) -> bool {
        let mut state = self.lock();
        state.rx_queue.enqueue(buf);
        state.rx_enabled
    }

    pub(crate) fn dequeue_rx(&self) -> Option<FrameBuffer> {
        self.lock().rx_queue.dequeue()
    }

    /// Account for a frame the upper layer has seen.
    ///
    /// Accepted frames are held until [`Self::take_completed_rx`]; a dropped frame's buffer is
    /// handed back for return to its owner.
    pub(crate) fn finish_rx(&self, buf: FrameBuffer, delivery: Delivery) -> Option<FrameBuffer> {
        let mut state = self.lock();
        match delivery {
            Delivery::Accepted => {
                state.stats.record_rx(buf.len());
                state.rx_held.push_back(buf);
                None
            }
            Delivery::Dropped => {
                state.stats.rx_dropped += 1;
                Some(buf)
            }
        }
    }

    /// Remove up to `max` of the oldest frames the upper layer has finished with.
    pub(crate) fn take_completed_rx(&self, max: usize) -> Vec<FrameBuffer> {
        let mut state = self.lock();
        let n = max.min(state.rx_held.len());
        state.rx_held.drain(..n).collect()
    }

    /// Transmit-done interrupt for a frame of `len` bytes.
    ///
    /// Returns `false` if the lockup injector swallowed the completion; the queue is then stopped
    /// until [`Self::transmit_timeout`] runs.
    pub(crate) fn complete_tx(&self, len: usize) -> bool {
        let mut state = self.lock();
        if self.lockup.should_drop_completion(state.stats.tx_packets) {
            state.deferred.frames += 1;
            state.deferred.bytes += len as u64;
            state.stop_queue();
            tracing::debug!(
                endpoint = %self.id,
                tx_packets = state.stats.tx_packets,
                "simulating transmit lockup"
            );
            return false;
        }
        state.stats.record_tx(len);
        true
    }

    /// Return a buffer minted by this endpoint's pool.
    ///
    /// Refilling an empty pool wakes a stopped queue, unless a lockup still holds back a transmit
    /// completion. Rejected buffers are logged and dropped.
    pub(crate) fn release(&self, buf: FrameBuffer) -> Result<(), PoolError> {
        let mut state = self.lock();
        let was_empty = state.pool.is_empty();
        if let Err(err) = state.pool.release(buf) {
            match err {
                PoolError::StaleBuffer { .. } => {
                    tracing::warn!(endpoint = %self.id, "dropping buffer abandoned by pool reset: {err}")
                }
                _ => {
                    tracing::error!(endpoint = %self.id, "rejected buffer release: {err}");
                    debug_assert!(false, "{}: pool contract violated: {err}", self.id);
                }
            }
            return Err(err);
        }
        if was_empty && state.queue_stopped && state.up && state.deferred.frames == 0 {
            state.queue_stopped = false;
            tracing::debug!(endpoint = %self.id, "buffer returned, waking queue");
        }
        Ok(())
    }

    /// Recover from a transmit timeout.
    ///
    /// Counts one transmit error, delivers any completions swallowed by a lockup, replaces the
    /// pool with a fresh one and restarts the queue. Safe to call when nothing is stuck.
    pub(crate) fn transmit_timeout(&self) -> TimeoutRecovery {
        let mut state = self.lock();
        let deferred = std::mem::take(&mut state.deferred);
        state.stats.tx_packets += deferred.frames;
        state.stats.tx_bytes += deferred.bytes;
        state.stats.tx_errors += 1;

        let abandoned_buffers = state.pool.reset();
        if state.up {
            state.queue_stopped = false;
        }

        tracing::warn!(
            endpoint = %self.id,
            completed = deferred.frames,
            abandoned = abandoned_buffers,
            "transmit timeout, pool reset"
        );

        TimeoutRecovery {
            endpoint: self.id,
            completed_frames: deferred.frames,
            completed_bytes: deferred.bytes,
            abandoned_buffers,
        }
    }

    /// Identifies the current stop episode while the endpoint is up with its queue stopped.
    pub(crate) fn stall_marker(&self) -> Option<u64> {
        let state = self.lock();
        (state.up && state.queue_stopped).then_some(state.stop_count)
    }

    /// Empty the receive queue and the held list.
    pub(crate) fn drain_rx(&self) -> Vec<FrameBuffer> {
        let mut state = self.lock();
        let mut out: Vec<FrameBuffer> = state.rx_queue.drain().collect();
        out.extend(state.rx_held.drain(..));
        out
    }

    pub(crate) fn pool_occupancy(&self) -> (usize, usize) {
        let state = self.lock();
        (state.pool.available(), state.pool.outstanding())
    }
}
