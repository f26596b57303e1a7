//! Flush-time reduction
//!
//! On every tick the reducer turns the store's contents into a
//! [`FlushSnapshot`] and applies the per-kind reset policy:
//!
//! | Kind    | Reported                                   | After flush            |
//! |---------|--------------------------------------------|------------------------|
//! | counter | rate per second, raw count                 | bucket removed         |
//! | gauge   | current value                              | kept as is             |
//! | timer   | mean, upper, upper_P, lower, count         | observations cleared   |
//!
//! A final `numStats` point counts the buckets reported this cycle.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::store::AggregateStore;

/// How the percentile threshold trims the timer tail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentileMode {
    /// Drop `floor((100 - P) * n / 100)` of the largest observations before
    /// computing the mean and `upper_P`
    #[default]
    Trimmed,
    /// Trim count computed with truncating integer division, which is zero
    /// for every P in 1..=99: the mean covers every observation and
    /// `upper_P` equals `upper`
    Legacy,
}

impl std::str::FromStr for PercentileMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trimmed" => Ok(PercentileMode::Trimmed),
            "legacy" => Ok(PercentileMode::Legacy),
            other => Err(format!(
                "unknown percentile mode '{}', expected 'trimmed' or 'legacy'",
                other
            )),
        }
    }
}

/// Derived field a data point reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatField {
    /// Counter events per second
    Rate,
    /// Counter raw count for the window
    Count,
    /// Gauge value
    Gauge,
    TimerMean,
    TimerUpper,
    /// Largest observation kept after percentile trimming
    TimerUpperAtThreshold,
    TimerLower,
    TimerCount,
    /// Number of buckets reported this cycle
    NumStats,
}

/// Value of a data point with its semantic type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointValue {
    Integer(i64),
    Double(f64),
}

impl PointValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            PointValue::Integer(i) => *i as f64,
            PointValue::Double(d) => *d,
        }
    }
}

impl std::fmt::Display for PointValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PointValue::Integer(i) => write!(f, "{}", i),
            PointValue::Double(d) => write!(f, "{:.6}", d),
        }
    }
}

/// One (bucket, field) pair produced by a flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Bucket name; empty for `NumStats`
    pub bucket: String,
    pub field: StatField,
    pub value: PointValue,
}

impl DataPoint {
    fn new(bucket: &str, field: StatField, value: PointValue) -> Self {
        DataPoint {
            bucket: bucket.to_string(),
            field,
            value,
        }
    }
}

/// Everything a single flush produced, shared read-only by every sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushSnapshot {
    /// Whole seconds since the Unix epoch, shared by every point
    pub timestamp: u64,
    /// Threshold used for the `upper_P` field name
    pub percent_threshold: u8,
    /// Flush interval the snapshot covers
    pub interval: Duration,
    pub points: Vec<DataPoint>,
}

impl FlushSnapshot {
    /// Look up a point by bucket and field
    pub fn get(&self, bucket: &str, field: StatField) -> Option<PointValue> {
        self.points
            .iter()
            .find(|p| p.field == field && p.bucket == bucket)
            .map(|p| p.value)
    }

    /// Value of the trailing `numStats` point
    pub fn num_stats(&self) -> u64 {
        match self.get("", StatField::NumStats) {
            Some(PointValue::Integer(n)) => n.max(0) as u64,
            _ => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Summary statistics of one timer bucket
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimerSummary {
    pub mean: f64,
    pub upper: f64,
    pub upper_at_threshold: f64,
    pub lower: f64,
    pub count: usize,
}

/// Sort `values` in place and reduce them to a summary
///
/// An empty slice yields an all-zero summary.
pub fn summarize_timer(values: &mut [f64], percent_threshold: u8, mode: PercentileMode) -> TimerSummary {
    let count = values.len();
    if count == 0 {
        return TimerSummary::default();
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let lower = values[0];
    let upper = values[count - 1];

    let retained = match mode {
        PercentileMode::Legacy => count,
        PercentileMode::Trimmed => {
            let tail_pct = usize::from(100u8.saturating_sub(percent_threshold));
            let excluded = tail_pct * count / 100;
            (count - excluded).max(1)
        }
    };
    debug_assert!(retained >= 1 && retained <= count);

    let kept = &values[..retained];
    let mean = kept.iter().sum::<f64>() / retained as f64;
    let upper_at_threshold = match mode {
        PercentileMode::Legacy => upper,
        PercentileMode::Trimmed => kept[retained - 1],
    };

    TimerSummary {
        mean,
        upper,
        upper_at_threshold,
        lower,
        count,
    }
}

/// Reduces an [`AggregateStore`] into snapshots
#[derive(Debug, Clone)]
pub struct FlushReducer {
    interval: Duration,
    percent_threshold: u8,
    mode: PercentileMode,
}

impl FlushReducer {
    pub fn new(interval: Duration, percent_threshold: u8, mode: PercentileMode) -> Self {
        debug_assert!(!interval.is_zero(), "flush interval must be positive");
        debug_assert!(
            (1..=100).contains(&percent_threshold),
            "percent threshold {} out of range",
            percent_threshold
        );
        FlushReducer {
            interval,
            percent_threshold,
            mode,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn percent_threshold(&self) -> u8 {
        self.percent_threshold
    }

    pub fn mode(&self) -> PercentileMode {
        self.mode
    }

    /// Reduce the store into a snapshot stamped with `timestamp`, then
    /// reset counters and timer observations
    ///
    /// Buckets are emitted in name order within each kind.
    pub fn reduce(&self, store: &mut AggregateStore, timestamp: u64) -> FlushSnapshot {
        let mut points = Vec::new();
        let mut num_stats: i64 = 0;
        let interval_secs = self.interval.as_secs_f64();

        let mut counters = store.drain_counters();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        for (bucket, count) in counters {
            let rate = count / interval_secs;
            points.push(DataPoint::new(&bucket, StatField::Rate, PointValue::Double(rate)));
            points.push(DataPoint::new(
                &bucket,
                StatField::Count,
                PointValue::Integer(count.trunc() as i64),
            ));
            num_stats += 1;
        }

        let mut gauges: Vec<(&str, i64)> = store.gauges().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        for (bucket, value) in gauges {
            points.push(DataPoint::new(bucket, StatField::Gauge, PointValue::Integer(value)));
            num_stats += 1;
        }

        let mut timers: Vec<(&str, &mut Vec<f64>)> = store.timers_mut().collect();
        timers.sort_by(|a, b| a.0.cmp(b.0));
        for (bucket, values) in timers {
            let summary = summarize_timer(values, self.percent_threshold, self.mode);
            values.clear();

            points.push(DataPoint::new(bucket, StatField::TimerMean, PointValue::Double(summary.mean)));
            points.push(DataPoint::new(bucket, StatField::TimerUpper, PointValue::Double(summary.upper)));
            points.push(DataPoint::new(
                bucket,
                StatField::TimerUpperAtThreshold,
                PointValue::Double(summary.upper_at_threshold),
            ));
            points.push(DataPoint::new(bucket, StatField::TimerLower, PointValue::Double(summary.lower)));
            points.push(DataPoint::new(
                bucket,
                StatField::TimerCount,
                PointValue::Integer(summary.count as i64),
            ));
            num_stats += 1;
        }

        points.push(DataPoint::new("", StatField::NumStats, PointValue::Integer(num_stats)));

        FlushSnapshot {
            timestamp,
            percent_threshold: self.percent_threshold,
            interval: self.interval,
            points,
        }
    }
}
