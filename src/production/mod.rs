pub mod aggregator;
pub mod config;
mod server;
mod stats;

pub use aggregator::{spawn_aggregator, AggregatorHandle};
pub use config::{AggregatorConfig, ConfigError, GraphiteConfig};
pub use server::{configured_sinks, ServerError, StatsdServer};
pub use stats::{ServerStats, StatsSnapshot};
