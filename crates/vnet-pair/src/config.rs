use std::time::Duration;

use crate::error::ConfigError;

/// Default number of buffers in each endpoint's pool.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Largest accepted pool; slot indices are `u16`.
pub const MAX_POOL_SIZE: usize = 4096;

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_millis(500);

/// Inclusive range of MTUs an endpoint may be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtuBounds {
    pub min: usize,
    pub max: usize,
}

impl MtuBounds {
    /// Smallest MTU an IPv4 host must support (RFC 791).
    pub const IPV4_MIN: usize = 68;
    /// Ethernet payload size.
    pub const ETHERNET_MAX: usize = 1500;

    pub fn contains(&self, mtu: usize) -> bool {
        (self.min..=self.max).contains(&mtu)
    }

    pub fn check(&self, mtu: usize) -> Result<(), ConfigError> {
        if self.contains(mtu) {
            Ok(())
        } else {
            Err(ConfigError::MtuOutOfRange {
                mtu,
                min: self.min,
                max: self.max,
            })
        }
    }
}

impl Default for MtuBounds {
    fn default() -> Self {
        Self {
            min: Self::IPV4_MIN,
            max: Self::ETHERNET_MAX,
        }
    }
}

/// Construction-time settings for an [`EndpointPair`](crate::EndpointPair).
///
/// There is no runtime reconfiguration apart from per-endpoint MTU changes, which stay within
/// [`PairConfig::mtu_bounds`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairConfig {
    /// Buffers per endpoint pool.
    pub pool_size: usize,
    pub mtu_bounds: MtuBounds,
    /// How long a transmit queue may stay stopped before the watchdog recovers it.
    pub watchdog_timeout: Duration,
    /// Drop the transmit completion of every `lockup_period`-th frame. `0` disables the lockup.
    pub lockup_period: u64,
    /// Install [`SubnetFlip`](crate::SubnetFlip) on both endpoints.
    pub transform_frames: bool,
}

impl Default for PairConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            mtu_bounds: MtuBounds::default(),
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            lockup_period: 0,
            transform_frames: true,
        }
    }
}

impl PairConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError::InvalidPoolSize {
                size: self.pool_size,
                max: MAX_POOL_SIZE,
            });
        }

        let MtuBounds { min, max } = self.mtu_bounds;
        if min < MtuBounds::IPV4_MIN || max > MtuBounds::ETHERNET_MAX || min > max {
            return Err(ConfigError::InvalidMtuBounds { min, max });
        }

        if self.watchdog_timeout.is_zero() {
            return Err(ConfigError::InvalidWatchdogTimeout);
        }

        Ok(())
    }

    /// Build a config from `VNET_*` environment variables, keeping defaults for unset ones.
    ///
    /// - `VNET_POOL_SIZE`
    /// - `VNET_MTU_MIN` / `VNET_MTU_MAX`
    /// - `VNET_WATCHDOG_TIMEOUT_MS`
    /// - `VNET_LOCKUP`
    /// - `VNET_TRANSFORM` (`1`/`0`/`true`/`false`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(size) = parse_var(&lookup, "VNET_POOL_SIZE")? {
            config.pool_size = size;
        }
        if let Some(min) = parse_var(&lookup, "VNET_MTU_MIN")? {
            config.mtu_bounds.min = min;
        }
        if let Some(max) = parse_var(&lookup, "VNET_MTU_MAX")? {
            config.mtu_bounds.max = max;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "VNET_WATCHDOG_TIMEOUT_MS")? {
            config.watchdog_timeout = Duration::from_millis(ms);
        }
        if let Some(period) = parse_var(&lookup, "VNET_LOCKUP")? {
            config.lockup_period = period;
        }
        if let Some(raw) = lookup("VNET_TRANSFORM") {
            config.transform_frames = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidEnv("VNET_TRANSFORM")),
            };
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv(var)),
    }
}
