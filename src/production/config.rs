//! Daemon configuration
//!
//! Loaded in three layers, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. TOML file named by `STATSD_CONFIG` (optional)
//! 3. Environment variables
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | STATSD_CONFIG | - | Path to a TOML config file |
//! | STATSD_ADDRESS | 0.0.0.0:8125 | UDP listen address (`:8125` accepted) |
//! | STATSD_GRAPHITE | - | Graphite address, e.g. `localhost:2003` |
//! | STATSD_GANGLIA | - | gmond hosts, comma separated |
//! | STATSD_GANGLIA_PORT | 8649 | gmond port |
//! | STATSD_GANGLIA_SPOOF_HOST | - | Spoofed host string |
//! | STATSD_FLUSH_INTERVAL | 10 | Flush interval in seconds |
//! | STATSD_PERCENT_THRESHOLD | 90 | Timer percentile threshold |
//! | STATSD_PERCENTILE_MODE | trimmed | `trimmed` or `legacy` |
//! | STATSD_STATS_PREFIX | stats. | Counter rate prefix |
//! | STATSD_COUNTERS_PREFIX | stats.counters. | Counter count prefix |
//! | STATSD_GAUGES_PREFIX | stats.gauges. | Gauge prefix |
//! | STATSD_TIMERS_PREFIX | stats.timers. | Timer prefix |
//! | STATSD_DEBUG | false | Verbose packet/flush logging |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backends::ganglia::GangliaConfig;
use crate::backends::graphite::NamePrefixes;
use crate::metrics::PercentileMode;

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8125";
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_PERCENT_THRESHOLD: u8 = 90;
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 512;
pub const DEFAULT_SAMPLE_QUEUE_CAPACITY: usize = 10_000;
pub const DEFAULT_DECODE_CONCURRENCY: usize = 1024;
pub const DEFAULT_SNAPSHOT_QUEUE_CAPACITY: usize = 4;
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(5);

const DATAGRAM_SIZE_MAX: usize = 65_535;
const DECODE_CONCURRENCY_MAX: usize = 1 << 20;

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io { path: PathBuf, source: std::io::Error },
    /// Config file is not valid TOML for this schema
    Parse(toml::de::Error),
    /// A value is out of range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "invalid config file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Graphite backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphiteConfig {
    /// `host:port` of the carbon plaintext listener
    pub address: String,
}

/// Full daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// UDP address to receive metrics on
    pub listen_address: String,
    /// Flush interval, in whole seconds when serialized
    #[serde(with = "duration_secs")]
    pub flush_interval: Duration,
    /// Timer percentile threshold, 1..=100
    pub percent_threshold: u8,
    pub percentile_mode: PercentileMode,
    /// Graphite name prefixes
    pub prefixes: NamePrefixes,
    pub graphite: Option<GraphiteConfig>,
    pub ganglia: Option<GangliaConfig>,
    /// Verbose packet and flush logging
    pub debug: bool,
    /// Receive buffer per datagram; longer datagrams are truncated
    pub max_datagram_size: usize,
    /// Samples buffered between decoders and the aggregator
    pub sample_queue_capacity: usize,
    /// Decode tasks allowed in flight at once
    pub decode_concurrency: usize,
    /// Snapshots buffered between the aggregator and the emitter
    pub snapshot_queue_capacity: usize,
    /// Upper bound on one backend write
    #[serde(with = "duration_millis")]
    pub backend_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            percent_threshold: DEFAULT_PERCENT_THRESHOLD,
            percentile_mode: PercentileMode::default(),
            prefixes: NamePrefixes::default(),
            graphite: None,
            ganglia: None,
            debug: false,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            sample_queue_capacity: DEFAULT_SAMPLE_QUEUE_CAPACITY,
            decode_concurrency: DEFAULT_DECODE_CONCURRENCY,
            snapshot_queue_capacity: DEFAULT_SNAPSHOT_QUEUE_CAPACITY,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }
}

impl AggregatorConfig {
    /// Load defaults, then the `STATSD_CONFIG` file, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("STATSD_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: AggregatorConfig = toml::from_str(s)?;
        config.listen_address = normalize_address(&config.listen_address);
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Override fields from process environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Override fields from any key lookup
    ///
    /// Unparsable values leave the field unchanged.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("STATSD_ADDRESS") {
            self.listen_address = normalize_address(&addr);
        }

        if let Some(addr) = lookup("STATSD_GRAPHITE") {
            let addr = addr.trim();
            self.graphite = if addr.is_empty() {
                None
            } else {
                Some(GraphiteConfig {
                    address: addr.to_string(),
                })
            };
        }

        let mut ganglia = self.ganglia.take().unwrap_or_default();
        if let Some(hosts) = lookup("STATSD_GANGLIA") {
            ganglia.servers = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(port) = lookup("STATSD_GANGLIA_PORT").and_then(|s| s.parse().ok()) {
            ganglia.port = port;
        }
        if let Some(spoof) = lookup("STATSD_GANGLIA_SPOOF_HOST") {
            ganglia.spoof_host = spoof;
        }
        self.ganglia = if ganglia.servers.is_empty() {
            None
        } else {
            Some(ganglia)
        };

        if let Some(secs) = lookup("STATSD_FLUSH_INTERVAL").and_then(|s| s.parse::<u64>().ok()) {
            self.flush_interval = Duration::from_secs(secs);
        }
        if let Some(pct) = lookup("STATSD_PERCENT_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.percent_threshold = pct;
        }
        if let Some(mode) = lookup("STATSD_PERCENTILE_MODE").and_then(|s| s.parse().ok()) {
            self.percentile_mode = mode;
        }

        if let Some(p) = lookup("STATSD_STATS_PREFIX") {
            self.prefixes.stats = p;
        }
        if let Some(p) = lookup("STATSD_COUNTERS_PREFIX") {
            self.prefixes.counters = p;
        }
        if let Some(p) = lookup("STATSD_GAUGES_PREFIX") {
            self.prefixes.gauges = p;
        }
        if let Some(p) = lookup("STATSD_TIMERS_PREFIX") {
            self.prefixes.timers = p;
        }

        if let Some(debug) = lookup("STATSD_DEBUG") {
            self.debug = matches!(debug.to_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// Check every value is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.percent_threshold) {
            return Err(ConfigError::Invalid(format!(
                "percent_threshold must be in 1..=100, got {}",
                self.percent_threshold
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid("flush_interval must be positive".to_string()));
        }
        if !(1..=DATAGRAM_SIZE_MAX).contains(&self.max_datagram_size) {
            return Err(ConfigError::Invalid(format!(
                "max_datagram_size must be in 1..={}, got {}",
                DATAGRAM_SIZE_MAX, self.max_datagram_size
            )));
        }
        for (name, value) in [
            ("sample_queue_capacity", self.sample_queue_capacity),
            ("decode_concurrency", self.decode_concurrency),
            ("snapshot_queue_capacity", self.snapshot_queue_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.decode_concurrency > DECODE_CONCURRENCY_MAX {
            return Err(ConfigError::Invalid(format!(
                "decode_concurrency must be at most {}, got {}",
                DECODE_CONCURRENCY_MAX, self.decode_concurrency
            )));
        }
        if self.backend_timeout.is_zero() {
            return Err(ConfigError::Invalid("backend_timeout must be positive".to_string()));
        }
        if let Some(graphite) = &self.graphite {
            if graphite.address.trim().is_empty() {
                return Err(ConfigError::Invalid("graphite.address is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Expand a bare `:port` to `0.0.0.0:port`
pub fn normalize_address(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

/// Serde helper for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // u128 is not representable in TOML
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
