use thiserror::Error;

use crate::endpoint::EndpointId;

/// Reasons a transmit submitted through [`EndpointPair::submit_transmit`] was refused.
///
/// A refused transmit never touches the endpoint statistics.
///
/// [`EndpointPair::submit_transmit`]: crate::EndpointPair::submit_transmit
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxError {
    #[error("frame too short: {len} bytes (minimum {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("frame too long: {len} bytes (maximum {max})")]
    FrameTooLong { len: usize, max: usize },

    /// The sender's pool is empty. Retry once the queue has been woken.
    #[error("out of transmit buffers")]
    OutOfBuffers,

    #[error("endpoint {0} is down")]
    Down(EndpointId),
}

impl TxError {
    /// Whether the same frame may succeed later without the caller changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfBuffers | Self::Down(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mtu {mtu} out of range ({min}..={max})")]
    MtuOutOfRange { mtu: usize, min: usize, max: usize },

    #[error("invalid pool size {size} (expected 1..={max})")]
    InvalidPoolSize { size: usize, max: usize },

    #[error("invalid mtu bounds {min}..={max}")]
    InvalidMtuBounds { min: usize, max: usize },

    #[error("watchdog timeout must be non-zero")]
    InvalidWatchdogTimeout,

    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

/// Buffer pool contract violations. These indicate a caller bug and leave the pool untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("buffer owned by {owner} released into the pool of {pool}")]
    ForeignBuffer { owner: EndpointId, pool: EndpointId },

    #[error("stale buffer from pool epoch {buffer_epoch} (current epoch {pool_epoch})")]
    StaleBuffer { buffer_epoch: u32, pool_epoch: u32 },

    #[error("buffer slot {slot} beyond pool capacity {capacity}")]
    SlotOutOfRange { slot: u16, capacity: usize },

    #[error("buffer slot {slot} released twice")]
    SlotOccupied { slot: u16 },
}
