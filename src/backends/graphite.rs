//! Graphite plaintext sink
//!
//! Every flush opens a fresh TCP connection, writes all points as
//! `<name> <value> <timestamp>\n` in a single write and closes the
//! connection. A failed connection drops that cycle's data for Graphite.
//!
//! Naming (with the default prefixes):
//!
//! ```text
//! stats.<bucket>                  counter rate per second
//! stats.counters.<bucket>         counter raw count
//! stats.gauges.<bucket>           gauge value
//! stats.timers.<bucket>.mean      (also .upper, .upper_<P>, .lower, .count)
//! stats.statsd.numStats           buckets reported this cycle
//! ```

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{BackendError, BackendSink};
use crate::metrics::{DataPoint, FlushSnapshot, StatField};

/// Name prefixes distinguishing the rate, counter, gauge and timer views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamePrefixes {
    /// Counter rates and the `statsd.numStats` point
    pub stats: String,
    pub counters: String,
    pub gauges: String,
    pub timers: String,
}

impl Default for NamePrefixes {
    fn default() -> Self {
        NamePrefixes {
            stats: "stats.".to_string(),
            counters: "stats.counters.".to_string(),
            gauges: "stats.gauges.".to_string(),
            timers: "stats.timers.".to_string(),
        }
    }
}

/// Line-oriented Graphite (carbon plaintext) sink
#[derive(Debug, Clone)]
pub struct GraphiteSink {
    address: String,
    prefixes: NamePrefixes,
}

impl GraphiteSink {
    pub fn new(address: impl Into<String>, prefixes: NamePrefixes) -> Self {
        GraphiteSink {
            address: address.into(),
            prefixes,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Full Graphite path of a data point
    pub fn metric_name(&self, point: &DataPoint, percent_threshold: u8) -> String {
        let p = &self.prefixes;
        let b = &point.bucket;
        match point.field {
            StatField::Rate => format!("{}{}", p.stats, b),
            StatField::Count => format!("{}{}", p.counters, b),
            StatField::Gauge => format!("{}{}", p.gauges, b),
            StatField::TimerMean => format!("{}{}.mean", p.timers, b),
            StatField::TimerUpper => format!("{}{}.upper", p.timers, b),
            StatField::TimerUpperAtThreshold => {
                format!("{}{}.upper_{}", p.timers, b, percent_threshold)
            }
            StatField::TimerLower => format!("{}{}.lower", p.timers, b),
            StatField::TimerCount => format!("{}{}.count", p.timers, b),
            StatField::NumStats => format!("{}statsd.numStats", p.stats),
        }
    }

    /// Render a whole snapshot as one plaintext payload
    pub fn format_snapshot(&self, snapshot: &FlushSnapshot) -> BytesMut {
        let mut buf = BytesMut::with_capacity(snapshot.len() * 64);
        let mut line = String::with_capacity(128);
        for point in &snapshot.points {
            line.clear();
            let name = self.metric_name(point, snapshot.percent_threshold);
            // Writing into a String cannot fail.
            let _ = writeln!(line, "{} {} {}", name, point.value, snapshot.timestamp);
            buf.put_slice(line.as_bytes());
        }
        buf
    }

    async fn send(&self, snapshot: &FlushSnapshot) -> Result<(), BackendError> {
        let payload = self.format_snapshot(snapshot);
        debug!(
            "Send to graphite {}: [[[{}]]]",
            self.address,
            String::from_utf8_lossy(&payload)
        );

        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| BackendError::Connect {
                address: self.address.clone(),
                source,
            })?;
        stream.write_all(&payload).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

impl BackendSink for GraphiteSink {
    fn name(&self) -> &str {
        "graphite"
    }

    fn emit<'a>(
        &'a self,
        snapshot: &'a FlushSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>> {
        Box::pin(self.send(snapshot))
    }
}
