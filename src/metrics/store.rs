//! Aggregate store
//!
//! Holds the running counters, gauges and timer observations between
//! flushes. The store is owned by exactly one consumer task, so none of
//! the maps are behind a lock.
//!
//! Per-kind semantics:
//! - counter: `value / sample_rate` is added to the bucket
//! - gauge: `+N`/`-N` adjusts the bucket, a bare `N` replaces it
//! - timer: the value is appended to the bucket's observation list
//!
//! Numeric parse failures contribute zero; `apply` never fails.

use ahash::AHashMap;

use super::types::{MetricKind, MetricSample};

/// In-memory aggregation state for one flush window
#[derive(Debug, Default, Clone)]
pub struct AggregateStore {
    counters: AHashMap<String, f64>,
    gauges: AHashMap<String, i64>,
    timers: AHashMap<String, Vec<f64>>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one sample's effect
    pub fn apply(&mut self, sample: MetricSample) {
        match sample.kind {
            MetricKind::Counter => self.apply_counter(sample),
            MetricKind::Gauge => self.apply_gauge(sample),
            MetricKind::Timer => self.apply_timer(sample),
        }
    }

    fn apply_counter(&mut self, sample: MetricSample) {
        let value = sample.value.parse::<f64>().unwrap_or(0.0);
        let increment = value * (1.0 / sample.sample_rate);
        *self.counters.entry(sample.bucket).or_insert(0.0) += increment;
    }

    fn apply_gauge(&mut self, sample: MetricSample) {
        let value = sample.value.as_str();
        let current = self.gauges.entry(sample.bucket).or_insert(0);

        if let Some(delta) = value.strip_prefix('+') {
            let delta = delta.parse::<i64>().unwrap_or(0);
            *current = current.saturating_add(delta);
        } else if let Some(delta) = value.strip_prefix('-') {
            let delta = delta.parse::<i64>().unwrap_or(0);
            *current = current.saturating_sub(delta);
        } else {
            *current = value.parse::<i64>().unwrap_or(0);
        }
    }

    fn apply_timer(&mut self, sample: MetricSample) {
        let value = sample.value.parse::<f64>().unwrap_or(0.0);
        self.timers.entry(sample.bucket).or_default().push(value);
    }

    /// Accumulated count for a counter bucket (0 when untouched this window)
    pub fn counter(&self, bucket: &str) -> f64 {
        self.counters.get(bucket).copied().unwrap_or(0.0)
    }

    /// Current gauge value, if the bucket has ever been set
    pub fn gauge(&self, bucket: &str) -> Option<i64> {
        self.gauges.get(bucket).copied()
    }

    /// Observations recorded for a timer bucket this window
    pub fn timer(&self, bucket: &str) -> Option<&[f64]> {
        self.timers.get(bucket).map(Vec::as_slice)
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn gauge_count(&self) -> usize {
        self.gauges.len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Remove and return every counter bucket touched since the last flush
    pub fn drain_counters(&mut self) -> Vec<(String, f64)> {
        self.counters.drain().collect()
    }

    /// Gauge buckets; flushing never resets them
    pub fn gauges(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.gauges.iter().map(|(bucket, value)| (bucket.as_str(), *value))
    }

    /// Timer buckets with mutable observation lists
    ///
    /// The reducer sorts and clears the lists in place; the keys survive
    /// so an idle timer still reports zeros next window.
    pub fn timers_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<f64>)> + '_ {
        self.timers
            .iter_mut()
            .map(|(bucket, values)| (bucket.as_str(), values))
    }
}
