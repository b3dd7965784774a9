// src/core/tasks/timeout_watchdog.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::core::BridgeError;
use crate::core::delivery::Completions;

const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(5);
const MAX_SWEEP_PERIOD: Duration = Duration::from_millis(100);

/// A task that fails requests whose deadline has passed.
///
/// Expired entries are completed through the same conditional resolve as
/// replies, so a reply and a timeout racing for one request deliver once.
pub struct TimeoutWatchdog {
    completions: Arc<Completions>,
    period: Duration,
}

impl TimeoutWatchdog {
    /// Sweeps about ten times per `request_timeout`.
    pub fn new(completions: Arc<Completions>, request_timeout: Duration) -> Self {
        Self {
            completions,
            period: (request_timeout / 10).clamp(MIN_SWEEP_PERIOD, MAX_SWEEP_PERIOD),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Request timeout watchdog started (period {:?}).", self.period);
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Request timeout watchdog shutting down.");
                    return;
                }
                _ = interval.tick() => {
                    self.sweep(Instant::now());
                }
            }
        }
    }

    /// Fails every request whose deadline is at or before `now`.
    /// Returns how many were failed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut timed_out = 0;
        for (token, request_id) in self.completions.table().expired(now) {
            if self
                .completions
                .complete_error(token, request_id, &BridgeError::RequestTimeout)
            {
                timed_out += 1;
            }
        }
        if timed_out > 0 {
            debug!("Timed out {timed_out} requests.");
        }
        timed_out
    }
}
