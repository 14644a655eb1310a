//! Queue statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Snapshot of a queue's counters. Durations are milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub min: u64,
    pub max: u64,
    pub avg: f64,
    pub active: usize,
    pub complete: usize,
    pub success: usize,
    pub errored: usize,
    pub retried: usize,
    pub total: usize,
    pub elapsed: u64,
}

/// Running handler timings, folded in as tasks succeed.
#[derive(Debug, Clone, Default)]
pub(crate) struct Timings {
    min: Option<Duration>,
    max: Duration,
    avg_ms: f64,
    samples: usize,
}

impl Timings {
    pub(crate) fn record(&mut self, elapsed: Duration) {
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = self.max.max(elapsed);
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.avg_ms = (self.avg_ms * self.samples as f64 + ms) / (self.samples + 1) as f64;
        self.samples += 1;
    }

    pub(crate) fn min_ms(&self) -> u64 {
        self.min.map_or(0, |min| millis(min))
    }

    pub(crate) fn max_ms(&self) -> u64 {
        millis(self.max)
    }

    pub(crate) fn avg_ms(&self) -> f64 {
        self.avg_ms
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
