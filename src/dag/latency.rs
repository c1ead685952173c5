// src/dag/latency.rs

//! Scheduler liveness self-check.
//!
//! A background task sleeps for exactly one second at a time and records how
//! late each wake-up was. A busy or blocked event loop shows up here long
//! before it shows up in check results.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, trace, warn};

use crate::dag::runnable::lock;

pub const LATENCY_SAMPLES: usize = 60;
pub const LATENCY_TICK: Duration = Duration::from_secs(1);
pub const LATENCY_WARN: Duration = Duration::from_millis(500);
pub const LATENCY_ERROR: Duration = Duration::from_secs(2);

/// min / max / average over the retained samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencySummary {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub samples: usize,
}

/// Ring buffer of the last [`LATENCY_SAMPLES`] tick deviations.
#[derive(Debug, Default)]
pub struct LatencyHistory {
    samples: VecDeque<Duration>,
}

impl LatencyHistory {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_SAMPLES),
        }
    }

    pub fn record(&mut self, deviation: Duration) {
        if self.samples.len() == LATENCY_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(deviation);

        if deviation >= LATENCY_ERROR {
            error!(latency_ms = deviation.as_millis() as u64, "scheduler latency is very high");
        } else if deviation >= LATENCY_WARN {
            warn!(latency_ms = deviation.as_millis() as u64, "scheduler latency is high");
        } else {
            trace!(latency_ms = deviation.as_millis() as u64, "scheduler latency sample");
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> LatencySummary {
        if self.samples.is_empty() {
            return LatencySummary::default();
        }
        let min = self.samples.iter().copied().min().unwrap_or_default();
        let max = self.samples.iter().copied().max().unwrap_or_default();
        let total: Duration = self.samples.iter().sum();
        LatencySummary {
            min,
            max,
            avg: total / self.samples.len() as u32,
            samples: self.samples.len(),
        }
    }
}

/// Sample loop latency once per tick until the returned handle is aborted.
pub fn spawn_latency_monitor(history: Arc<Mutex<LatencyHistory>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let before = Instant::now();
            tokio::time::sleep(LATENCY_TICK).await;
            let deviation = before.elapsed().saturating_sub(LATENCY_TICK);
            lock(&history).record(deviation);
        }
    })
}
