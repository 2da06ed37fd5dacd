//! The fabric binding the two endpoints together.

use std::sync::Arc;

use crate::buffer::FrameBuffer;
use crate::config::PairConfig;
use crate::endpoint::{Endpoint, EndpointId, EndpointStatus, TimeoutRecovery};
use crate::error::{ConfigError, TxError};
use crate::frame::{self, FrameTransform, SubnetFlip};
use crate::sink::FrameSink;
use crate::stats::EndpointStats;

/// Buffer accounting at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    /// Frames pulled back from receive queues and the upper layer.
    pub reclaimed: usize,
    /// Reclaimed frames whose pool had been reset in the meantime.
    pub stale: usize,
    /// Current-generation buffers still unaccounted for after reclaiming. Zero unless a buffer
    /// leaked.
    pub missing: usize,
    /// Buffers freed with the pools.
    pub freed: usize,
}

/// Two endpoints wired back to back.
///
/// Frames enter through [`submit_transmit`](Self::submit_transmit) and leave through the
/// [`FrameSink`] given at construction. The pair is `Sync`; concurrent callers on either endpoint
/// are serialized per endpoint.
pub struct EndpointPair {
    config: PairConfig,
    endpoints: [Endpoint; 2],
    sink: Arc<dyn FrameSink>,
    transform: Option<Arc<dyn FrameTransform>>,
}

impl std::fmt::Debug for EndpointPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPair")
            .field("config", &self.config)
            .field("endpoints", &self.endpoints)
            .field("transform", &self.transform.is_some())
            .finish_non_exhaustive()
    }
}

impl EndpointPair {
    pub fn new(config: PairConfig, sink: impl FrameSink + 'static) -> Result<Self, ConfigError> {
        Self::with_shared_sink(config, Arc::new(sink))
    }

    pub fn with_shared_sink(
        config: PairConfig,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let transform: Option<Arc<dyn FrameTransform>> = if config.transform_frames {
            Some(Arc::new(SubnetFlip))
        } else {
            None
        };
        let endpoints = EndpointId::ALL.map(|id| Endpoint::new(id, &config));
        tracing::debug!(
            pool_size = config.pool_size,
            lockup = config.lockup_period,
            "endpoint pair created"
        );
        Ok(Self {
            config,
            endpoints,
            sink,
            transform,
        })
    }

    /// Replace the frame transform, regardless of [`PairConfig::transform_frames`].
    pub fn with_transform(mut self, transform: impl FrameTransform + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn without_transform(mut self) -> Self {
        self.transform = None;
        self
    }

    pub fn config(&self) -> &PairConfig {
        &self.config
    }

    pub fn endpoint(&self, id: EndpointId) -> &Endpoint {
        &self.endpoints[id.index()]
    }

    /// Transmit `frame` from `src` to its peer.
    ///
    /// Before this returns, the peer has either delivered the frame to the sink (receive
    /// interrupts enabled) or queued it, and `src` has run its transmit completion unless a
    /// simulated lockup swallowed it.
    pub fn submit_transmit(&self, src: EndpointId, frame: &[u8]) -> Result<(), TxError> {
        let tx = self.endpoint(src);
        let rx = self.endpoint(src.peer());

        let mut buf = tx.begin_transmit(frame)?;
        if let Some(transform) = &self.transform {
            transform.apply(buf.frame_mut());
        }
        let len = buf.len();

        // Receive interrupt on the peer first, then transmit-done on the sender.
        if rx.enqueue_rx(buf) {
            self.deliver(rx, 1);
        }
        tx.complete_tx(len);
        Ok(())
    }

    /// Deliver up to `budget` frames queued on `id` (e.g. while its receive interrupts were
    /// disabled). Returns how many frames were handed to the sink.
    pub fn poll_rx(&self, id: EndpointId, budget: usize) -> usize {
        self.deliver(self.endpoint(id), budget)
    }

    fn deliver(&self, rx: &Endpoint, budget: usize) -> usize {
        let mut delivered = 0;
        for _ in 0..budget {
            let Some(buf) = rx.dequeue_rx() else {
                break;
            };
            let delivery = self.sink.on_frame_received(rx.id(), buf.frame());
            tracing::trace!(endpoint = %rx.id(), len = buf.len(), ?delivery, "frame delivered");
            if let Some(dropped) = rx.finish_rx(buf, delivery) {
                self.release_to_owner(dropped);
            }
            delivered += 1;
        }
        delivered
    }

    /// The upper layer on `id` is done with up to `max` of its oldest delivered frames; return
    /// their buffers to the sender's pool. Returns how many frames were completed.
    pub fn complete_rx(&self, id: EndpointId, max: usize) -> usize {
        let done = self.endpoint(id).take_completed_rx(max);
        let count = done.len();
        for buf in done {
            self.release_to_owner(buf);
        }
        count
    }

    fn release_to_owner(&self, buf: FrameBuffer) -> bool {
        // Rejections are logged by the owning endpoint.
        self.endpoint(buf.owner()).release(buf).is_ok()
    }

    /// Watchdog entry point: recover `id` from a stuck transmit.
    pub fn transmit_timeout(&self, id: EndpointId) -> TimeoutRecovery {
        self.endpoint(id).transmit_timeout()
    }

    pub fn get_stats(&self, id: EndpointId) -> EndpointStats {
        self.endpoint(id).stats()
    }

    pub fn status(&self, id: EndpointId) -> EndpointStatus {
        self.endpoint(id).status()
    }

    pub fn open(&self, id: EndpointId) {
        self.endpoint(id).open();
    }

    pub fn close(&self, id: EndpointId) {
        self.endpoint(id).close();
    }

    pub fn set_rx_interrupts(&self, id: EndpointId, enabled: bool) {
        self.endpoint(id).set_rx_interrupts(enabled);
    }

    pub fn change_mtu(&self, id: EndpointId, mtu: usize) -> Result<(), ConfigError> {
        self.endpoint(id).change_mtu(mtu)
    }

    /// Build a frame from `id` addressed to its peer.
    pub fn build_frame(&self, id: EndpointId, ethertype: u16, payload: &[u8]) -> Vec<u8> {
        frame::build_frame(id.mac(), ethertype, payload)
    }

    /// Take both endpoints down, return every queued or held frame to its pool and free the
    /// pools.
    pub fn teardown(self) -> TeardownReport {
        let mut report = TeardownReport::default();
        for endpoint in &self.endpoints {
            endpoint.close();
        }
        for endpoint in &self.endpoints {
            for buf in endpoint.drain_rx() {
                report.reclaimed += 1;
                if !self.release_to_owner(buf) {
                    report.stale += 1;
                }
            }
        }
        for endpoint in &self.endpoints {
            let (available, outstanding) = endpoint.pool_occupancy();
            report.freed += available;
            report.missing += outstanding;
        }
        if report.missing > 0 {
            tracing::warn!(missing = report.missing, "buffers leaked at teardown");
        }
        tracing::debug!(?report, "endpoint pair torn down");
        report
    }
}
