use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Delivery latency samples kept for percentile estimation.
const LATENCY_WINDOW: usize = 1024;

/// Operational snapshot exposed to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub pending_depth: i64,
    pub dead_letter_depth: i64,
    pub dispatched: u64,
    pub verified: u64,
    pub dead_lettered: u64,
    pub deduplicated: u64,
    pub rate_limited: u64,
    pub retried: u64,
    pub gateway_deferrals: u64,
    /// verified / dispatched, 1.0 when nothing was dispatched yet.
    pub success_rate: f64,
    pub latency_p50_secs: Option<f64>,
    pub latency_p95_secs: Option<f64>,
    pub latency_p99_secs: Option<f64>,
}

/// Process-wide delivery counters. Cheap to clone behind an Arc; all
/// counters are monotonic since process start.
#[derive(Default)]
pub struct DeliveryMetrics {
    dispatched: AtomicU64,
    verified: AtomicU64,
    dead_lettered: AtomicU64,
    deduplicated: AtomicU64,
    rate_limited: AtomicU64,
    retried: AtomicU64,
    gateway_deferrals: AtomicU64,
    latency_samples: Mutex<VecDeque<f64>>,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verified(&self) {
        self.verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gateway_deferral(&self) {
        self.gateway_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    /// Enqueue-to-verified duration of one successful delivery.
    pub fn record_latency(&self, seconds: f64) {
        let mut samples = self.latency_samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(seconds);
    }

    pub fn snapshot(&self, pending_depth: i64, dead_letter_depth: i64) -> QueueMetrics {
        let dispatched = self.dispatched.load(Ordering::Relaxed);
        let verified = self.verified.load(Ordering::Relaxed);
        let success_rate = if dispatched == 0 {
            1.0
        } else {
            verified as f64 / dispatched as f64
        };

        let mut sorted: Vec<f64> = {
            let samples = self.latency_samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.iter().copied().collect()
        };
        sorted.sort_by(|a, b| a.total_cmp(b));

        QueueMetrics {
            pending_depth,
            dead_letter_depth,
            dispatched,
            verified,
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            gateway_deferrals: self.gateway_deferrals.load(Ordering::Relaxed),
            success_rate,
            latency_p50_secs: percentile(&sorted, 50.0),
            latency_p95_secs: percentile(&sorted, 95.0),
            latency_p99_secs: percentile(&sorted, 99.0),
        }
    }
}

fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank).copied()
}
