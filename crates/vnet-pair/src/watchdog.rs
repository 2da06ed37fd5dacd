//! Transmit watchdog.
//!
//! [`Watchdog::check`] is a deterministic tick: given the current time it recovers every endpoint
//! whose transmit queue has been stopped for at least the timeout. [`Watchdog::spawn`] drives the
//! same tick from a tokio interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PairConfig;
use crate::endpoint::{EndpointId, TimeoutRecovery};
use crate::pair::EndpointPair;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    /// Stop episode and the time it was first observed, per endpoint.
    stalls: [Option<(u64, Instant)>; 2],
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            stalls: [None; 2],
        }
    }

    pub fn from_config(config: &PairConfig) -> Self {
        Self::new(config.watchdog_timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How often the spawned task ticks.
    pub fn poll_interval(&self) -> Duration {
        (self.timeout / 4).max(MIN_POLL_INTERVAL)
    }

    /// Run one watchdog tick at `now`.
    pub fn check(&mut self, pair: &EndpointPair, now: Instant) -> Vec<TimeoutRecovery> {
        let mut recoveries = Vec::new();
        for id in EndpointId::ALL {
            let slot = &mut self.stalls[id.index()];
            let Some(episode) = pair.endpoint(id).stall_marker() else {
                *slot = None;
                continue;
            };
            let previous = *slot;
            match previous {
                Some((seen, since)) if seen == episode => {
                    if now.saturating_duration_since(since) >= self.timeout {
                        recoveries.push(pair.transmit_timeout(id));
                        *slot = None;
                    }
                }
                _ => *slot = Some((episode, now)),
            }
        }
        recoveries
    }

    /// Tick until `shutdown` flips to `true` (or its sender is dropped). Returns the number of
    /// recoveries performed.
    pub async fn run(mut self, pair: Arc<EndpointPair>, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut recovered = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = tokio::time::Instant::now().into_std();
                    recovered += self.check(&pair, now).len() as u64;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        recovered
    }

    /// Run the watchdog on the current tokio runtime.
    pub fn spawn(self, pair: Arc<EndpointPair>) -> WatchdogHandle {
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(pair, rx));
        WatchdogHandle { shutdown, task }
    }
}

#[derive(Debug)]
pub struct WatchdogHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl WatchdogHandle {
    /// Stop the watchdog task and return how many recoveries it performed.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(recovered) => recovered,
            Err(err) => {
                tracing::warn!("watchdog task failed: {err}");
                0
            }
        }
    }
}
