// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for trace operations.
//!
//! Lightweight in-process latency and counter tracking. Operation names are
//! dotted paths such as `trace.manager.add` or
//! `trace.driver.local.save_node`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Latency per operation name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Update delivery counters.
    events: EventCounters,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            events: EventCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record one completed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        if let Ok(mut ops) = self.operations.write() {
            ops.entry(name.to_string())
                .or_insert_with(OperationMetrics::new)
                .record(duration);
        }
    }

    /// Count an update published by a hub.
    pub fn record_event_published(&self) {
        self.events.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an update skipped for a full subscriber queue.
    pub fn record_event_dropped(&self) {
        self.events.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a subscriber removed because its queue was full.
    pub fn record_subscriber_disconnected(&self) {
        self.events.disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .ok()
            .and_then(|ops| ops.get(name).cloned())
    }

    pub fn event_counts(&self) -> EventCounts {
        self.events.snapshot()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = self
            .operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            operations,
            events: self.events.snapshot(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        if let Ok(mut ops) = self.operations.write() {
            ops.clear();
        }
        self.events.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics for one operation name.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bounds in microseconds; one extra overflow bucket follows.
    buckets: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile as the upper bound of the bucket it falls in.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = match self.buckets.get(i) {
                    Some(&bound) => bound,
                    None => self.buckets.last().copied().unwrap_or(0) * 10,
                };
                return Duration::from_micros(micros);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Trace operations are mostly in-memory or single-file writes:
        // 10us, 100us, 1ms, 10ms, 100ms, 1s
        Self::with_buckets(vec![10, 100, 1_000, 10_000, 100_000, 1_000_000])
    }
}

#[derive(Debug, Default)]
struct EventCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicU64,
}

impl EventCounters {
    fn snapshot(&self) -> EventCounts {
        EventCounts {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.published.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.disconnected.store(0, Ordering::Relaxed);
    }
}

/// Update delivery totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub published: u64,
    pub dropped: u64,
    pub disconnected: u64,
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OperationMetrics>,
    pub events: EventCounts,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Trace Metrics ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Updates: {} published, {} dropped, {} subscribers disconnected\n\n",
            self.events.published, self.events.dropped, self.events.disconnected
        ));

        if !self.operations.is_empty() {
            let mut names: Vec<&String> = self.operations.keys().collect();
            names.sort();

            report.push_str("Operations:\n");
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}
