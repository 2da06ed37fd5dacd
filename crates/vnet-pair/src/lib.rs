//! A pair of software network endpoints that exchange Ethernet frames with each other.
//!
//! Each [`Endpoint`] owns a fixed pool of frame buffers and a receive queue. Transmitting on one
//! endpoint draws a buffer from its own pool, places the frame on the peer's receive queue, and
//! then runs the peer's receive completion and the sender's transmit completion inline, the way a
//! NIC raises RX and TX-done interrupts. Buffers only come back to the sender's pool once the
//! receiving upper layer is done with them, so a slow consumer exerts backpressure on the sender.
//!
//! The [`EndpointPair`] is the only way frames enter the fabric; upper layers plug in through
//! [`FrameSink`]. A [`Watchdog`] recovers endpoints whose transmit path stays stopped (for example
//! after a simulated lockup, see [`LockupInjector`]).
#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod frame;
pub mod pair;
pub mod pool;
pub mod queue;
pub mod sink;
pub mod stats;
pub mod watchdog;

pub use buffer::{FrameBuffer, MAX_FRAME};
pub use config::{MtuBounds, PairConfig, DEFAULT_POOL_SIZE, MAX_POOL_SIZE};
pub use endpoint::{Endpoint, EndpointId, EndpointStatus, TimeoutRecovery};
pub use error::{ConfigError, PoolError, TxError};
pub use fault::LockupInjector;
pub use frame::{build_frame, FrameTransform, MacAddr, SubnetFlip, ETH_HLEN, MIN_FRAME_LEN};
pub use pair::{EndpointPair, TeardownReport};
pub use pool::BufferPool;
pub use queue::RxQueue;
pub use sink::{Delivery, FrameLog, FrameSink};
pub use stats::EndpointStats;
pub use watchdog::{Watchdog, WatchdogHandle};
