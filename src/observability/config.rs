//! Logging Configuration
//!
//! Loaded from environment variables.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | RUST_LOG | - | Full filter directive; wins over the verbose flag |
//! | STATSD_LOG_FORMAT | text | `text` or `json` |

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "plain" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `RUST_LOG` directive, when set
    pub filter: Option<String>,
    /// Lower the default level to debug
    pub verbose: bool,
}

impl LogConfig {
    /// Load from the process environment
    pub fn from_env(verbose: bool) -> Self {
        Self::from_lookup(verbose, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(verbose: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        LogConfig {
            format: lookup("STATSD_LOG_FORMAT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            filter: lookup("RUST_LOG").filter(|s| !s.trim().is_empty()),
            verbose,
        }
    }

    /// Filter directive handed to the subscriber
    pub fn directive(&self) -> String {
        match &self.filter {
            Some(filter) => filter.clone(),
            None if self.verbose => "debug".to_string(),
            None => "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        let config = LogConfig::from_lookup(false, |_| None);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.directive(), "info");

        let verbose = LogConfig::from_lookup(true, |_| None);
        assert_eq!(verbose.directive(), "debug");
    }

    #[test]
    fn test_rust_log_wins() {
        let config = LogConfig::from_lookup(true, |key| match key {
            "RUST_LOG" => Some("statsd_rs=trace".to_string()),
            "STATSD_LOG_FORMAT" => Some("JSON".to_string()),
            _ => None,
        });
        assert_eq!(config.directive(), "statsd_rs=trace");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_falls_back() {
        let config = LogConfig::from_lookup(false, |key| {
            (key == "STATSD_LOG_FORMAT").then(|| "xml".to_string())
        });
        assert_eq!(config.format, LogFormat::Text);
    }
}
