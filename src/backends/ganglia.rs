//! Ganglia gmetric sink
//!
//! Each data point becomes one independent submission: a metadata packet
//! followed by a string-valued packet, both XDR encoded (gmond 3.1 wire
//! format) and sent over UDP to every configured gmond. Submissions are
//! spawned and never awaited, so an unreachable gmond only loses its own
//! packets.
//!
//! ## Packet layout
//!
//! ```text
//! metadata (id 128): host, name, spoof, type, name, units, slope, tmax, dmax,
//!                    extra count, [GROUP, <group>], [SPOOF_HOST, <host>]
//! value    (id 133): host, name, spoof, "%s", value
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tracing::debug;

use super::{BackendError, BackendSink};
use crate::metrics::{DataPoint, FlushSnapshot, PointValue, StatField};

const GMETADATA_FULL: u32 = 128;
const GMETRIC_STRING: u32 = 133;
const SLOPE_BOTH: u32 = 3;
const GROUP: &str = "statsd";
const UNITS: &str = "count";

/// Default gmond UDP port
pub const DEFAULT_GANGLIA_PORT: u16 = 8649;

/// Ganglia backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GangliaConfig {
    /// gmond hosts; all share `port`
    pub servers: Vec<String>,
    pub port: u16,
    /// Host name to report metrics under; empty disables spoofing
    pub spoof_host: String,
}

impl Default for GangliaConfig {
    fn default() -> Self {
        GangliaConfig {
            servers: Vec::new(),
            port: DEFAULT_GANGLIA_PORT,
            spoof_host: String::new(),
        }
    }
}

/// gmetric value types used by this sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmetricType {
    Uint32,
    Int32,
    Double,
}

impl GmetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GmetricType::Uint32 => "uint32",
            GmetricType::Int32 => "int32",
            GmetricType::Double => "double",
        }
    }

    /// Semantic type of a point value
    ///
    /// Integers outside the 32-bit ranges are declared `double`.
    pub fn of(value: &PointValue) -> Self {
        match *value {
            PointValue::Integer(i) if (0..=i64::from(u32::MAX)).contains(&i) => {
                GmetricType::Uint32
            }
            PointValue::Integer(i) if (i64::from(i32::MIN)..0).contains(&i) => {
                GmetricType::Int32
            }
            _ => GmetricType::Double,
        }
    }
}

fn put_xdr_u32(buf: &mut BytesMut, v: u32) {
    buf.put_u32(v);
}

fn put_xdr_string(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
    let pad = (4 - bytes.len() % 4) % 4;
    buf.put_bytes(0, pad);
}

/// Ganglia sink sending gmetric packets to a fixed set of gmond servers
#[derive(Debug, Clone)]
pub struct GangliaSink {
    servers: Arc<[SocketAddr]>,
    spoof_host: String,
    /// tmax and dmax, in seconds
    lifetime_secs: u32,
}

impl GangliaSink {
    /// Create a sink for already-resolved servers
    ///
    /// `flush_interval` sets tmax = dmax = twice the interval.
    pub fn new(servers: Vec<SocketAddr>, spoof_host: impl Into<String>, flush_interval: Duration) -> Self {
        let lifetime_secs = u32::try_from(flush_interval.as_secs().saturating_mul(2)).unwrap_or(u32::MAX);
        GangliaSink {
            servers: servers.into(),
            spoof_host: spoof_host.into(),
            lifetime_secs,
        }
    }

    /// Resolve every configured host to an IPv4 address on `config.port`
    pub async fn resolve(config: &GangliaConfig, flush_interval: Duration) -> Result<Self, BackendError> {
        let mut servers = Vec::with_capacity(config.servers.len());
        for host in &config.servers {
            let host = host.trim();
            if host.is_empty() {
                continue;
            }
            let addr = tokio::net::lookup_host((host, config.port))
                .await
                .map_err(|e| BackendError::Resolve(format!("{}: {}", host, e)))?
                .find(SocketAddr::is_ipv4)
                .ok_or_else(|| BackendError::Resolve(format!("{}: no IPv4 address", host)))?;
            servers.push(addr);
        }
        if servers.is_empty() {
            return Err(BackendError::Resolve("no ganglia servers configured".to_string()));
        }
        Ok(Self::new(servers, config.spoof_host.clone(), flush_interval))
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    pub fn lifetime_secs(&self) -> u32 {
        self.lifetime_secs
    }

    /// gmetric name of a data point
    pub fn metric_name(point: &DataPoint, percent_threshold: u8) -> String {
        let b = &point.bucket;
        match point.field {
            StatField::Rate | StatField::Gauge => format!("stats_{}", b),
            StatField::Count => format!("stats_counts_{}", b),
            StatField::TimerMean => format!("stats_timers_{}_mean", b),
            StatField::TimerUpper => format!("stats_timers_{}_upper", b),
            StatField::TimerUpperAtThreshold => {
                format!("stats_timers_{}_upper_{}", b, percent_threshold)
            }
            StatField::TimerLower => format!("stats_timers_{}_lower", b),
            StatField::TimerCount => format!("stats_timers_{}_count", b),
            StatField::NumStats => "statsd_numStats".to_string(),
        }
    }

    fn spoofing(&self) -> bool {
        !self.spoof_host.is_empty()
    }

    /// Encode the metadata packet announcing a metric
    pub fn encode_metadata(&self, name: &str, kind: GmetricType) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        put_xdr_u32(&mut buf, GMETADATA_FULL);
        put_xdr_string(&mut buf, &self.spoof_host);
        put_xdr_string(&mut buf, name);
        put_xdr_u32(&mut buf, u32::from(self.spoofing()));
        put_xdr_string(&mut buf, kind.as_str());
        put_xdr_string(&mut buf, name);
        put_xdr_string(&mut buf, UNITS);
        put_xdr_u32(&mut buf, SLOPE_BOTH);
        put_xdr_u32(&mut buf, self.lifetime_secs);
        put_xdr_u32(&mut buf, self.lifetime_secs);

        if self.spoofing() {
            put_xdr_u32(&mut buf, 2);
            put_xdr_string(&mut buf, "GROUP");
            put_xdr_string(&mut buf, GROUP);
            put_xdr_string(&mut buf, "SPOOF_HOST");
            put_xdr_string(&mut buf, &self.spoof_host);
        } else {
            put_xdr_u32(&mut buf, 1);
            put_xdr_string(&mut buf, "GROUP");
            put_xdr_string(&mut buf, GROUP);
        }
        buf.freeze()
    }

    /// Encode the packet carrying a metric's value as a string
    pub fn encode_value(&self, name: &str, value: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        put_xdr_u32(&mut buf, GMETRIC_STRING);
        put_xdr_string(&mut buf, &self.spoof_host);
        put_xdr_string(&mut buf, name);
        put_xdr_u32(&mut buf, u32::from(self.spoofing()));
        put_xdr_string(&mut buf, "%s");
        put_xdr_string(&mut buf, value);
        buf.freeze()
    }

    async fn send(&self, snapshot: &FlushSnapshot) -> Result<(), BackendError> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);

        for point in &snapshot.points {
            let name = Self::metric_name(point, snapshot.percent_threshold);
            let value = match point.value {
                PointValue::Integer(i) => i.to_string(),
                PointValue::Double(d) => d.to_string(),
            };
            debug!("Ganglia send metric {} value {}", name, value);

            let metadata = self.encode_metadata(&name, GmetricType::of(&point.value));
            let packet = self.encode_value(&name, &value);
            let socket = Arc::clone(&socket);
            let servers = Arc::clone(&self.servers);

            tokio::spawn(async move {
                for server in servers.iter() {
                    if let Err(e) = socket.send_to(&metadata, *server).await {
                        debug!("Ganglia metadata to {} failed: {}", server, e);
                        continue;
                    }
                    if let Err(e) = socket.send_to(&packet, *server).await {
                        debug!("Ganglia value to {} failed: {}", server, e);
                    }
                }
            });
        }
        Ok(())
    }
}

impl BackendSink for GangliaSink {
    fn name(&self) -> &str {
        "ganglia"
    }

    fn emit<'a>(
        &'a self,
        snapshot: &'a FlushSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>> {
        Box::pin(self.send(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{AggregateStore, FlushReducer, MetricSample, PercentileMode};

    fn read_u32(buf: &[u8], pos: &mut usize) -> u32 {
        let v = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        v
    }

    fn read_string(buf: &[u8], pos: &mut usize) -> String {
        let len = read_u32(buf, pos) as usize;
        let s = String::from_utf8(buf[*pos..*pos + len].to_vec()).unwrap();
        *pos += len + (4 - len % 4) % 4;
        s
    }

    fn sink(spoof: &str) -> GangliaSink {
        GangliaSink::new(
            vec!["127.0.0.1:8649".parse().unwrap()],
            spoof,
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_xdr_string_padding() {
        let mut buf = BytesMut::new();
        put_xdr_string(&mut buf, "abcde");
        assert_eq!(buf.len(), 4 + 8);
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[9..], &[0, 0, 0]);

        let mut aligned = BytesMut::new();
        put_xdr_string(&mut aligned, "abcd");
        assert_eq!(aligned.len(), 8);
    }

    #[test]
    fn test_metadata_packet_layout() {
        let packet = sink("").encode_metadata("stats_hits", GmetricType::Double);
        let mut pos = 0;
        assert_eq!(read_u32(&packet, &mut pos), GMETADATA_FULL);
        assert_eq!(read_string(&packet, &mut pos), "");
        assert_eq!(read_string(&packet, &mut pos), "stats_hits");
        assert_eq!(read_u32(&packet, &mut pos), 0);
        assert_eq!(read_string(&packet, &mut pos), "double");
        assert_eq!(read_string(&packet, &mut pos), "stats_hits");
        assert_eq!(read_string(&packet, &mut pos), "count");
        assert_eq!(read_u32(&packet, &mut pos), SLOPE_BOTH);
        assert_eq!(read_u32(&packet, &mut pos), 20);
        assert_eq!(read_u32(&packet, &mut pos), 20);
        assert_eq!(read_u32(&packet, &mut pos), 1);
        assert_eq!(read_string(&packet, &mut pos), "GROUP");
        assert_eq!(read_string(&packet, &mut pos), "statsd");
        assert_eq!(pos, packet.len());
    }

    #[test]
    fn test_spoofed_packets_carry_host() {
        let s = sink("web01:web01");
        let meta = s.encode_metadata("statsd_numStats", GmetricType::Uint32);
        let mut pos = 0;
        read_u32(&meta, &mut pos);
        assert_eq!(read_string(&meta, &mut pos), "web01:web01");
        read_string(&meta, &mut pos);
        assert_eq!(read_u32(&meta, &mut pos), 1);

        let value = s.encode_value("statsd_numStats", "3");
        let mut pos = 0;
        assert_eq!(read_u32(&value, &mut pos), GMETRIC_STRING);
        assert_eq!(read_string(&value, &mut pos), "web01:web01");
        assert_eq!(read_string(&value, &mut pos), "statsd_numStats");
        assert_eq!(read_u32(&value, &mut pos), 1);
        assert_eq!(read_string(&value, &mut pos), "%s");
        assert_eq!(read_string(&value, &mut pos), "3");
        assert_eq!(pos, value.len());
    }

    #[test]
    fn test_metric_names_and_types() {
        let point = |bucket: &str, field, value| DataPoint {
            bucket: bucket.to_string(),
            field,
            value,
        };
        assert_eq!(
            GangliaSink::metric_name(&point("hits", StatField::Count, PointValue::Integer(1)), 90),
            "stats_counts_hits"
        );
        assert_eq!(
            GangliaSink::metric_name(
                &point("lat", StatField::TimerUpperAtThreshold, PointValue::Double(1.0)),
                95
            ),
            "stats_timers_lat_upper_95"
        );
        assert_eq!(
            GangliaSink::metric_name(&point("", StatField::NumStats, PointValue::Integer(0)), 90),
            "statsd_numStats"
        );
        assert_eq!(GmetricType::of(&PointValue::Integer(3)), GmetricType::Uint32);
        assert_eq!(GmetricType::of(&PointValue::Integer(-3)), GmetricType::Int32);
        assert_eq!(GmetricType::of(&PointValue::Double(3.0)), GmetricType::Double);
    }

    #[test]
    fn test_wide_integers_declared_double() {
        assert_eq!(GmetricType::of(&PointValue::Integer(u32::MAX as i64)), GmetricType::Uint32);
        assert_eq!(GmetricType::of(&PointValue::Integer(i32::MIN as i64)), GmetricType::Int32);
        assert_eq!(GmetricType::of(&PointValue::Integer(5_000_000_000)), GmetricType::Double);
        assert_eq!(GmetricType::of(&PointValue::Integer(-3_000_000_000)), GmetricType::Double);

        let s = sink("");
        let kind = GmetricType::of(&PointValue::Integer(5_000_000_000));
        let meta = s.encode_metadata("stats_counts_big", kind);
        let mut pos = 0;
        read_u32(&meta, &mut pos);
        read_string(&meta, &mut pos);
        read_string(&meta, &mut pos);
        read_u32(&meta, &mut pos);
        assert_eq!(read_string(&meta, &mut pos), "double");
    }

    #[tokio::test]
    async fn test_emit_sends_metadata_and_value_per_point() {
        let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let servers = vec![first.local_addr().unwrap(), second.local_addr().unwrap()];

        let mut store = AggregateStore::new();
        store.apply(MetricSample::gauge("temp", "7"));
        let snapshot = FlushReducer::new(Duration::from_secs(10), 90, PercentileMode::Trimmed)
            .reduce(&mut store, 1);

        let sink = GangliaSink::new(servers, "", Duration::from_secs(10));
        sink.emit(&snapshot).await.unwrap();

        // gauge + numStats, two packets each, on every server
        for gmond in [&first, &second] {
            let mut ids = Vec::new();
            let mut values = Vec::new();
            let mut buf = [0u8; 512];
            for _ in 0..4 {
                let (n, _) = tokio::time::timeout(Duration::from_secs(5), gmond.recv_from(&mut buf))
                    .await
                    .unwrap()
                    .unwrap();
                let mut pos = 0;
                let id = read_u32(&buf[..n], &mut pos);
                if id == GMETRIC_STRING {
                    read_string(&buf[..n], &mut pos);
                    values.push(read_string(&buf[..n], &mut pos));
                }
                ids.push(id);
            }
            assert_eq!(ids.iter().filter(|id| **id == GMETADATA_FULL).count(), 2);
            assert_eq!(ids.iter().filter(|id| **id == GMETRIC_STRING).count(), 2);
            values.sort();
            assert_eq!(values, vec!["stats_temp", "statsd_numStats"]);
        }
    }

    #[tokio::test]
    async fn test_resolve_requires_servers() {
        let config = GangliaConfig::default();
        let err = GangliaSink::resolve(&config, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, BackendError::Resolve(_)));

        let config = GangliaConfig {
            servers: vec!["127.0.0.1".to_string()],
            ..GangliaConfig::default()
        };
        let sink = GangliaSink::resolve(&config, Duration::from_secs(10)).await.unwrap();
        assert_eq!(sink.servers(), &["127.0.0.1:8649".parse::<SocketAddr>().unwrap()]);
        assert_eq!(sink.lifetime_secs(), 20);
    }
}
