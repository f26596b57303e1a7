pub mod backends;
pub mod metrics;
pub mod observability;
pub mod production;

pub use backends::{BackendError, BackendSink, GangliaSink, GraphiteSink, InMemorySink};
pub use metrics::{decode, AggregateStore, FlushReducer, FlushSnapshot, MetricKind, MetricSample};
pub use production::{AggregatorConfig, StatsdServer};
