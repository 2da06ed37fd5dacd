/// Simulated transmitter lockup: drops the transmit completion of every `period`-th frame.
///
/// The endpoint's queue stays stopped after a dropped completion until
/// [`EndpointPair::transmit_timeout`](crate::EndpointPair::transmit_timeout) delivers it, which is
/// normally the [`Watchdog`](crate::Watchdog)'s job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockupInjector {
    period: u64,
}

impl LockupInjector {
    pub fn new(period: u64) -> Self {
        Self { period }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn is_enabled(&self) -> bool {
        self.period != 0
    }

    /// Whether the completion for the frame that would bring the transmit count to
    /// `tx_packets + 1` should be dropped.
    pub fn should_drop_completion(&self, tx_packets: u64) -> bool {
        self.is_enabled() && (tx_packets + 1) % self.period == 0
    }
}
