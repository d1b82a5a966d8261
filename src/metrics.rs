//! Metric instruments.
//!
//! The registry is built once from the full set of operation names found in
//! the test plan (setup + endpoints + teardown) and is immutable afterwards —
//! construction *is* the one-time initialization, so recording before init or
//! initializing twice cannot be expressed. Share it across virtual users with
//! an `Arc`; every `record_*` method takes `&self` and is safe under
//! concurrent calls (independent atomic counters per instrument, no
//! cross-name coordination).
//!
//! Instruments store compact mergeable counters only; derived statistics
//! (averages, the Apdex score, the reuse rate) are computed at the
//! [`MetricsRegistry::snapshot`] boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Upper edges of the finite latency buckets, in milliseconds. Edges are
/// inclusive; the implicit seventh bucket is unbounded.
pub const LATENCY_BUCKETS_MS: [u64; 6] = [50, 200, 500, 1000, 2000, 5000];

#[derive(Debug)]
struct Distribution {
    count: AtomicU64,
    sum_ms: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl Distribution {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, duration_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.min_ms.fetch_min(duration_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(duration_ms, Ordering::Relaxed);
    }
}

/// Request counter, error counter and duration distribution for one named
/// operation.
#[derive(Debug)]
pub struct OpMetricSet {
    requests: AtomicU64,
    errors: AtomicU64,
    duration: Distribution,
}

impl OpMetricSet {
    fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            duration: Distribution::new(),
        }
    }
}

/// Apdex classification of a single sample against the threshold T.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApdexCategory {
    /// `duration <= T`
    Satisfied,
    /// `T < duration <= 4T`
    Tolerating,
    /// `duration > 4T`
    Frustrated,
}

#[derive(Debug)]
pub struct MetricsRegistry {
    ops: HashMap<String, OpMetricSet>,
    status_classes: [AtomicU64; 4],
    latency_buckets: [AtomicU64; 7],
    apdex_satisfied: AtomicU64,
    apdex_tolerating: AtomicU64,
    apdex_frustrated: AtomicU64,
    connections_reused: AtomicU64,
    connections_total: AtomicU64,
    apdex_threshold_ms: u64,
}

impl MetricsRegistry {
    /// Build the registry from every operation name in the plan. Must happen
    /// before the scheduler starts any virtual user — instruments are never
    /// created lazily.
    pub fn new<I, S>(names: I, apdex_threshold_ms: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ops = names
            .into_iter()
            .map(|name| (name.into(), OpMetricSet::new()))
            .collect();
        Self {
            ops,
            status_classes: Default::default(),
            latency_buckets: Default::default(),
            apdex_satisfied: AtomicU64::new(0),
            apdex_tolerating: AtomicU64::new(0),
            apdex_frustrated: AtomicU64::new(0),
            connections_reused: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            apdex_threshold_ms,
        }
    }

    /// Record one completed call against the named operation's instruments.
    /// Unknown names are ignored — a config/metric mismatch must not crash a
    /// running test.
    pub fn record_op(&self, name: &str, duration_ms: u64, had_error: bool) {
        let Some(set) = self.ops.get(name) else {
            tracing::debug!(operation = name, "sample for unregistered operation dropped");
            return;
        };
        set.requests.fetch_add(1, Ordering::Relaxed);
        set.duration.record(duration_ms);
        if had_error {
            set.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one completed call against the aggregate instruments.
    pub fn record_aggregate(&self, status: u16, duration_ms: u64, connect_ms: f64) {
        if let Some(class) = status_class(status) {
            self.status_classes[class].fetch_add(1, Ordering::Relaxed);
        }
        self.latency_buckets[latency_bucket(duration_ms)].fetch_add(1, Ordering::Relaxed);
        match self.apdex_category(duration_ms) {
            ApdexCategory::Satisfied => self.apdex_satisfied.fetch_add(1, Ordering::Relaxed),
            ApdexCategory::Tolerating => self.apdex_tolerating.fetch_add(1, Ordering::Relaxed),
            ApdexCategory::Frustrated => self.apdex_frustrated.fetch_add(1, Ordering::Relaxed),
        };
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        if connect_ms == 0.0 {
            self.connections_reused.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn apdex_category(&self, duration_ms: u64) -> ApdexCategory {
        if duration_ms <= self.apdex_threshold_ms {
            ApdexCategory::Satisfied
        } else if duration_ms <= 4 * self.apdex_threshold_ms {
            ApdexCategory::Tolerating
        } else {
            ApdexCategory::Frustrated
        }
    }

    /// Copy out every instrument under stable string keys for an external
    /// time-series sink.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = self
            .ops
            .iter()
            .map(|(name, set)| {
                let count = set.duration.count.load(Ordering::Relaxed);
                let sum = set.duration.sum_ms.load(Ordering::Relaxed);
                let min = set.duration.min_ms.load(Ordering::Relaxed);
                (
                    name.clone(),
                    OpSnapshot {
                        requests: set.requests.load(Ordering::Relaxed),
                        errors: set.errors.load(Ordering::Relaxed),
                        duration_count: count,
                        duration_sum_ms: sum,
                        duration_min_ms: if count == 0 { 0 } else { min },
                        duration_max_ms: set.duration.max_ms.load(Ordering::Relaxed),
                        duration_avg_ms: if count == 0 {
                            0.0
                        } else {
                            sum as f64 / count as f64
                        },
                    },
                )
            })
            .collect();

        let satisfied = self.apdex_satisfied.load(Ordering::Relaxed);
        let tolerating = self.apdex_tolerating.load(Ordering::Relaxed);
        let frustrated = self.apdex_frustrated.load(Ordering::Relaxed);
        let apdex_total = satisfied + tolerating + frustrated;
        let reused = self.connections_reused.load(Ordering::Relaxed);
        let total = self.connections_total.load(Ordering::Relaxed);

        let mut latency_buckets = [0u64; 7];
        for (slot, bucket) in latency_buckets.iter_mut().zip(self.latency_buckets.iter()) {
            *slot = bucket.load(Ordering::Relaxed);
        }

        MetricsSnapshot {
            operations,
            status_2xx: self.status_classes[0].load(Ordering::Relaxed),
            status_3xx: self.status_classes[1].load(Ordering::Relaxed),
            status_4xx: self.status_classes[2].load(Ordering::Relaxed),
            status_5xx: self.status_classes[3].load(Ordering::Relaxed),
            latency_buckets,
            apdex_satisfied: satisfied,
            apdex_tolerating: tolerating,
            apdex_frustrated: frustrated,
            apdex_score: if apdex_total == 0 {
                1.0
            } else {
                (satisfied as f64 + 0.5 * tolerating as f64) / apdex_total as f64
            },
            connection_reuse_rate: if total == 0 {
                0.0
            } else {
                reused as f64 / total as f64
            },
        }
    }
}

/// 2xx..5xx -> bucket index; anything else (1xx, synthetic 0) is unclassified.
pub fn status_class(status: u16) -> Option<usize> {
    match status {
        200..=299 => Some(0),
        300..=399 => Some(1),
        400..=499 => Some(2),
        500..=599 => Some(3),
        _ => None,
    }
}

/// Index of the latency bucket a duration falls into. Upper edges are
/// inclusive: exactly 50ms lands in the first bucket.
pub fn latency_bucket(duration_ms: u64) -> usize {
    LATENCY_BUCKETS_MS
        .iter()
        .position(|&edge| duration_ms <= edge)
        .unwrap_or(LATENCY_BUCKETS_MS.len())
}

#[derive(Debug, Clone, Serialize)]
pub struct OpSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub duration_count: u64,
    pub duration_sum_ms: u64,
    pub duration_min_ms: u64,
    pub duration_max_ms: u64,
    pub duration_avg_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub operations: HashMap<String, OpSnapshot>,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    /// Counts per bucket, edges `<=50, <=200, <=500, <=1000, <=2000, <=5000,
    /// +inf` milliseconds.
    pub latency_buckets: [u64; 7],
    pub apdex_satisfied: u64,
    pub apdex_tolerating: u64,
    pub apdex_frustrated: u64,
    /// `(satisfied + 0.5 * tolerating) / total`; 1.0 with no samples.
    pub apdex_score: f64,
    pub connection_reuse_rate: f64,
}
