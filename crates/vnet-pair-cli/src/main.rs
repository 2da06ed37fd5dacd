#![forbid(unsafe_code)]

mod config;
mod traffic;

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vnet_pair::{EndpointId, EndpointPair, EndpointStats, FrameLog, Watchdog};

use crate::config::Config;

#[derive(Debug, Serialize)]
struct EndpointReport {
    name: &'static str,
    mac: String,
    mtu: usize,
    stats: EndpointStats,
}

#[derive(Debug, Serialize)]
struct Report {
    traffic: traffic::Summary,
    watchdog_recoveries: u64,
    endpoints: Vec<EndpointReport>,
    leaked_buffers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let log = Arc::new(FrameLog::new());
    let pair = Arc::new(EndpointPair::with_shared_sink(config.pair.clone(), log.clone())?);
    if let Some(mtu) = config.run.mtu {
        for id in EndpointId::ALL {
            pair.change_mtu(id, mtu)?;
        }
    }

    let watchdog = Watchdog::from_config(pair.config());
    let retry_delay = watchdog.poll_interval();
    // Enough attempts to span a few watchdog timeouts.
    let retry_limit = (4 * watchdog.timeout().as_millis() / retry_delay.as_millis().max(1)) as u32 + 1;
    let handle = watchdog.spawn(pair.clone());

    tracing::info!(
        count = config.run.count,
        pool_size = config.pair.pool_size,
        lockup = config.pair.lockup_period,
        hold_rx = config.run.hold_rx,
        "starting ping run"
    );
    let summary = traffic::run(&pair, &log, &config.run, retry_delay, retry_limit).await;
    let recoveries = handle.shutdown().await;
    let summary = summary?;

    let endpoints = EndpointId::ALL
        .into_iter()
        .map(|id| EndpointReport {
            name: id.name(),
            mac: id.mac().to_string(),
            mtu: pair.status(id).mtu,
            stats: pair.get_stats(id),
        })
        .collect();

    let pair = Arc::try_unwrap(pair).map_err(|_| anyhow!("endpoint pair still shared at exit"))?;
    let teardown = pair.teardown();

    let report = Report {
        traffic: summary,
        watchdog_recoveries: recoveries,
        endpoints,
        leaked_buffers: teardown.missing,
    };

    if config.run.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} requests, {} replies received, {} retries, {} watchdog recoveries",
            report.traffic.requests_sent,
            report.traffic.replies_received,
            report.traffic.retries,
            report.watchdog_recoveries,
        );
        for endpoint in &report.endpoints {
            let s = &endpoint.stats;
            println!(
                "{} ({}, mtu {}): rx {} pkts/{} bytes, {} dropped; tx {} pkts/{} bytes, {} errors",
                endpoint.name,
                endpoint.mac,
                endpoint.mtu,
                s.rx_packets,
                s.rx_bytes,
                s.rx_dropped,
                s.tx_packets,
                s.tx_bytes,
                s.tx_errors,
            );
        }
    }

    if report.leaked_buffers > 0 {
        anyhow::bail!("{} buffers leaked", report.leaked_buffers);
    }
    Ok(())
}
