//! Process-lifetime request counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Request counters shared by every clone of the client
///
/// Advisory only: never persisted, reset when the process starts.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    latency_micros: AtomicU64,
}

/// Point-in-time copy of [`RequestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retried_requests: u64,
    pub total_latency_secs: f64,
    pub avg_latency_secs: f64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let successful = self.successful.load(Ordering::Relaxed);
        let total_latency_secs = self.latency_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let avg_latency_secs = if successful > 0 {
            total_latency_secs / successful as f64
        } else {
            0.0
        };

        StatsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            successful_requests: successful,
            failed_requests: self.failed.load(Ordering::Relaxed),
            retried_requests: self.retried.load(Ordering::Relaxed),
            total_latency_secs,
            avg_latency_secs,
        }
    }
}

impl StatsSnapshot {
    /// Share of finished calls that succeeded, in percent
    pub fn success_rate(&self) -> f64 {
        let finished = self.successful_requests + self.failed_requests;
        if finished == 0 {
            0.0
        } else {
            self.successful_requests as f64 * 100.0 / finished as f64
        }
    }
}
