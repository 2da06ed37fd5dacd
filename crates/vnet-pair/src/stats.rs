use serde::{Deserialize, Serialize};

/// Per-endpoint interface counters, in the shape of `struct net_device_stats`.
///
/// [`EndpointPair::get_stats`](crate::EndpointPair::get_stats) returns a copy, so a snapshot never
/// changes underneath the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
}

impl EndpointStats {
    pub(crate) fn record_rx(&mut self, len: usize) {
        self.rx_packets += 1;
        self.rx_bytes += len as u64;
    }

    pub(crate) fn record_tx(&mut self, len: usize) {
        self.tx_packets += 1;
        self.tx_bytes += len as u64;
    }
}
