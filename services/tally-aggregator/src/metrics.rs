//! Observability counters for the tally aggregator
//!
//! Tracks ingestion volume, discarded records, data-quality signals and
//! refresh cycle outcomes, exported as a flat map for scraping.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the aggregator.
pub struct ServiceMetrics {
    // Ingestion
    pub records_polled: AtomicU64,
    pub records_applied: AtomicU64,
    pub records_discarded: AtomicU64,
    pub poll_failures: AtomicU64,

    // Data quality
    pub unmatched_regions: AtomicU64,

    // Refresh cycles
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub triggers_coalesced: AtomicU64,
    pub snapshots_published: AtomicU64,
    pub degraded_snapshots: AtomicU64,
    pub cycle_duration_us: Mutex<LatencyTracker>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            records_polled: AtomicU64::new(0),
            records_applied: AtomicU64::new(0),
            records_discarded: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            unmatched_regions: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            triggers_coalesced: AtomicU64::new(0),
            snapshots_published: AtomicU64::new(0),
            degraded_snapshots: AtomicU64::new(0),
            cycle_duration_us: Mutex::new(LatencyTracker::new(256)),
        }
    }

    /// Record the outcome of one topic poll.
    pub fn record_batch(&self, polled: u64, applied: u64, discarded: u64) {
        self.records_polled.fetch_add(polled, Ordering::Relaxed);
        self.records_applied.fetch_add(applied, Ordering::Relaxed);
        self.records_discarded.fetch_add(discarded, Ordering::Relaxed);
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the number of unmatched regions seen in the latest merge.
    pub fn set_unmatched_regions(&self, count: u64) {
        self.unmatched_regions.store(count, Ordering::Relaxed);
    }

    pub fn record_cycle_completed(&self, duration_us: u64) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.cycle_duration_us.lock() {
            tracker.record(duration_us);
        }
    }

    pub fn record_cycle_failed(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced_trigger(&self) {
        self.triggers_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self, degraded: bool) {
        self.snapshots_published.fetch_add(1, Ordering::Relaxed);
        if degraded {
            self.degraded_snapshots.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("records_polled".to_string(), self.records_polled.load(Ordering::Relaxed));
        m.insert("records_applied".to_string(), self.records_applied.load(Ordering::Relaxed));
        m.insert("records_discarded".to_string(), self.records_discarded.load(Ordering::Relaxed));
        m.insert("poll_failures".to_string(), self.poll_failures.load(Ordering::Relaxed));
        m.insert("unmatched_regions".to_string(), self.unmatched_regions.load(Ordering::Relaxed));
        m.insert("cycles_completed".to_string(), self.cycles_completed.load(Ordering::Relaxed));
        m.insert("cycles_failed".to_string(), self.cycles_failed.load(Ordering::Relaxed));
        m.insert("triggers_coalesced".to_string(), self.triggers_coalesced.load(Ordering::Relaxed));
        m.insert("snapshots_published".to_string(), self.snapshots_published.load(Ordering::Relaxed));
        m.insert("degraded_snapshots".to_string(), self.degraded_snapshots.load(Ordering::Relaxed));
        if let Ok(tracker) = self.cycle_duration_us.lock() {
            if let Some(p99) = tracker.percentile(99) {
                m.insert("cycle_duration_us_p99".to_string(), p99);
            }
        }
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
