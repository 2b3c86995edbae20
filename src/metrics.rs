//! Pipeline observability: latency histograms (p50/p95/p99) and event
//! counters for provider calls, content translation, commits and reseeds.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Measures elapsed time from creation until [`TimingSpan::finish`].
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// Record elapsed microseconds and return them.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring of the most recent samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample for the named histogram.
    pub fn record(&self, name: &'static str, value: f64) {
        self.histograms
            .lock()
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value);
        tracing::trace!(metric = name, value, "metric_recorded");
    }

    pub fn increment(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, by: u64) {
        *self.counters.lock().entry(name).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> MetricsSnapshot {
        let histograms = self
            .histograms
            .lock()
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50: ring.percentile(50.0),
                        p95: ring.percentile(95.0),
                        p99: ring.percentile(99.0),
                        count: ring.count,
                    },
                )
            })
            .collect();
        let counters = self
            .counters
            .lock()
            .iter()
            .map(|(&name, &value)| (name.to_string(), value))
            .collect();
        MetricsSnapshot {
            histograms,
            counters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub histograms: HashMap<String, MetricSummary>,
    pub counters: HashMap<String, u64>,
}

/// Well-known metric names.
pub mod metric_names {
    /// Histogram, microseconds per provider call (retries included).
    pub const PROVIDER_CALL: &str = "t_provider_call";
    /// Histogram, microseconds per `translate_content`.
    pub const CONTENT_TRANSLATE: &str = "t_content_translate";
    /// Histogram, chunk count per chunked `translate_content`.
    pub const CONTENT_CHUNKS: &str = "content_chunks";
    pub const STORE_REINITIALIZE: &str = "t_store_reinitialize";
    pub const COMMIT_FLUSH: &str = "t_commit_flush";

    pub const PROVIDER_FALLBACK: &str = "provider_fallback_total";
    pub const MEMO_HIT: &str = "memo_hit_total";
    pub const OVERRIDE_REJECTED: &str = "override_rejected_total";
    /// Records whose commit could not be written.
    pub const COMMIT_FAILED: &str = "commit_failed_total";
}
