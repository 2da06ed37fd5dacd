use std::time::Duration;

use clap::Parser;
use vnet_pair::PairConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "vnet-pair", version, about = "Drive ping traffic across an emulated endpoint pair")]
struct Args {
    /// Buffers per endpoint pool.
    ///
    /// Environment variable: `VNET_POOL_SIZE`.
    #[arg(long, env = "VNET_POOL_SIZE")]
    pool_size: Option<usize>,

    /// Drop the transmit completion of every Nth frame (0 disables).
    ///
    /// Environment variable: `VNET_LOCKUP`.
    #[arg(long, env = "VNET_LOCKUP")]
    lockup: Option<u64>,

    /// Watchdog timeout in milliseconds.
    ///
    /// Environment variable: `VNET_WATCHDOG_TIMEOUT_MS`.
    #[arg(long, env = "VNET_WATCHDOG_TIMEOUT_MS")]
    watchdog_timeout_ms: Option<u64>,

    /// MTU applied to both endpoints after start-up.
    #[arg(long)]
    mtu: Option<usize>,

    /// Send frames verbatim instead of flipping the IPv4 subnet octet.
    #[arg(long)]
    no_transform: bool,

    /// Number of pings sent from the first endpoint (at most one per ICMP sequence number).
    #[arg(long, default_value_t = 32)]
    count: u16,

    /// ICMP payload bytes per ping.
    #[arg(long, default_value_t = 56)]
    payload_len: usize,

    /// Never complete received frames, so the sender runs dry and relies on the watchdog.
    #[arg(long)]
    hold_rx: bool,

    /// Print final statistics as JSON.
    #[arg(long)]
    json: bool,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `VNET_LOG_LEVEL`.
    #[arg(long, env = "VNET_LOG_LEVEL")]
    log_level: Option<String>,
}

/// How the traffic run behaves, beyond the pair itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mtu: Option<usize>,
    pub count: u16,
    pub payload_len: usize,
    pub hold_rx: bool,
    pub json: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub pair: PairConfig,
    pub run: RunOptions,
    pub log_level: String,
}

impl Config {
    /// Flags win over `VNET_*` variables, which win over defaults.
    pub fn load() -> anyhow::Result<Self> {
        let args = Args::parse();

        let mut pair = PairConfig::from_env()?;
        if let Some(pool_size) = args.pool_size {
            pair.pool_size = pool_size;
        }
        if let Some(lockup) = args.lockup {
            pair.lockup_period = lockup;
        }
        if let Some(ms) = args.watchdog_timeout_ms {
            pair.watchdog_timeout = Duration::from_millis(ms);
        }
        if args.no_transform {
            pair.transform_frames = false;
        }
        pair.validate()?;

        let log_level = args
            .log_level
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            pair,
            run: RunOptions {
                mtu: args.mtu,
                count: args.count,
                payload_len: args.payload_len,
                hold_rx: args.hold_rx,
                json: args.json,
            },
            log_level,
        })
    }
}
