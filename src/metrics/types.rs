//! Core metric types for the aggregation engine

/// Kind of metric carried by a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Event count since the last flush, extrapolated by the sample rate
    /// Use for: request counts, cache hits, error counts
    Counter,

    /// Observed duration, reduced to min/max/mean at flush
    /// Use for: latency, job runtime
    Timer,

    /// Last-known absolute value, mutated by signed deltas
    /// Use for: queue depth, temperature, open connections
    Gauge,
}

impl MetricKind {
    /// Wire type code (`c`, `ms`, `g`)
    pub fn type_code(&self) -> &'static str {
        match self {
            MetricKind::Counter => "c",
            MetricKind::Timer => "ms",
            MetricKind::Gauge => "g",
        }
    }

    /// Parse a wire type code back to a kind
    pub fn from_type_code(code: &str) -> Option<MetricKind> {
        match code {
            "c" => Some(MetricKind::Counter),
            "ms" => Some(MetricKind::Timer),
            "g" => Some(MetricKind::Gauge),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_code())
    }
}

/// Sample rate assumed when the wire omits `|@rate` or it cannot be used
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// One decoded metric event, applied once to the aggregate store
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    /// Bucket name, `[A-Za-z0-9_.]+`
    pub bucket: String,

    /// Raw value text as captured from the wire (may carry a `+`/`-` sign)
    pub value: String,

    /// Metric kind
    pub kind: MetricKind,

    /// Fraction of real events that were sent; only counters use it
    pub sample_rate: f64,
}

impl MetricSample {
    /// Create a counter sample
    pub fn counter(bucket: impl Into<String>, value: impl Into<String>, sample_rate: f64) -> Self {
        MetricSample {
            bucket: bucket.into(),
            value: value.into(),
            kind: MetricKind::Counter,
            sample_rate,
        }
    }

    /// Create a timer sample
    pub fn timer(bucket: impl Into<String>, value: impl Into<String>) -> Self {
        MetricSample {
            bucket: bucket.into(),
            value: value.into(),
            kind: MetricKind::Timer,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Create a gauge sample
    pub fn gauge(bucket: impl Into<String>, value: impl Into<String>) -> Self {
        MetricSample {
            bucket: bucket.into(),
            value: value.into(),
            kind: MetricKind::Gauge,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}
