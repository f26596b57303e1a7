//! StatsD Aggregation Engine
//!
//! Decodes `name:value|type(|@rate)?` events, aggregates them per bucket
//! and reduces them to data points on every flush:
//!
//! - **Counters** are summed (extrapolated by sample rate) and reset each flush
//! - **Gauges** keep their last value across flushes
//! - **Timers** collect observations, reported as min/max/mean/percentile

pub mod decoder;
mod flush;
mod store;
mod types;

pub use decoder::{decode, DecodedSamples};
pub use flush::{
    summarize_timer, DataPoint, FlushReducer, FlushSnapshot, PercentileMode, PointValue,
    StatField, TimerSummary,
};
pub use store::AggregateStore;
pub use types::{MetricKind, MetricSample, DEFAULT_SAMPLE_RATE};
