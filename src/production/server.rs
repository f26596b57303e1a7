//! UDP ingestion server
//!
//! One receive loop reads datagrams and hands each to its own decode task.
//! Decode tasks are bounded by a semaphore; when all permits are taken the
//! loop stops reading and the kernel buffer absorbs the burst.
//!
//! ```text
//! UdpSocket ──recv_from──► decode task ──samples──► AggregatorActor ──► EmitterActor
//!                          (≤ decode_concurrency)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::spawn_aggregator;
use super::config::{AggregatorConfig, ConfigError};
use super::stats::ServerStats;
use crate::backends::{spawn_emitter, BackendError, BackendSink, GangliaSink, GraphiteSink};
use crate::metrics::{decode, MetricSample};

/// Error type for server startup and shutdown
#[derive(Debug)]
pub enum ServerError {
    /// Listen socket could not be bound
    Bind {
        address: String,
        source: std::io::Error,
    },
    Io(std::io::Error),
    Config(ConfigError),
    /// A configured backend could not be set up
    Backend(BackendError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind { address, source } => {
                write!(f, "cannot listen on {}: {}", address, source)
            }
            ServerError::Io(e) => write!(f, "server I/O error: {}", e),
            ServerError::Config(e) => write!(f, "{}", e),
            ServerError::Backend(e) => write!(f, "backend setup failed: {}", e),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Bind { source, .. } => Some(source),
            ServerError::Io(e) => Some(e),
            ServerError::Config(e) => Some(e),
            ServerError::Backend(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<ConfigError> for ServerError {
    fn from(e: ConfigError) -> Self {
        ServerError::Config(e)
    }
}

impl From<BackendError> for ServerError {
    fn from(e: BackendError) -> Self {
        ServerError::Backend(e)
    }
}

/// Build the sinks named in the configuration
///
/// An empty result is valid: aggregation still runs, nothing is written.
pub async fn configured_sinks(
    config: &AggregatorConfig,
) -> Result<Vec<Arc<dyn BackendSink>>, ServerError> {
    let mut sinks: Vec<Arc<dyn BackendSink>> = Vec::new();

    if let Some(graphite) = &config.graphite {
        info!("Graphite backend: {}", graphite.address);
        sinks.push(Arc::new(GraphiteSink::new(
            graphite.address.clone(),
            config.prefixes.clone(),
        )));
    }

    if let Some(ganglia) = &config.ganglia {
        let sink = GangliaSink::resolve(ganglia, config.flush_interval).await?;
        info!("Ganglia backend: {:?}", sink.servers());
        sinks.push(Arc::new(sink));
    }

    if sinks.is_empty() {
        warn!("No backends configured, aggregates will be discarded");
    }
    Ok(sinks)
}

/// Statsd daemon: UDP listener plus aggregator and emitter actors
pub struct StatsdServer {
    config: AggregatorConfig,
    socket: UdpSocket,
    sinks: Vec<Arc<dyn BackendSink>>,
    stats: Arc<ServerStats>,
}

impl StatsdServer {
    /// Validate the configuration and bind the listen socket
    pub async fn bind(
        config: AggregatorConfig,
        sinks: Vec<Arc<dyn BackendSink>>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let socket = UdpSocket::bind(&config.listen_address)
            .await
            .map_err(|source| ServerError::Bind {
                address: config.listen_address.clone(),
                source,
            })?;

        Ok(StatsdServer {
            config,
            socket,
            sinks,
            stats: Arc::new(ServerStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Receive until `shutdown` is cancelled, then drain and flush once more
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let StatsdServer {
            config,
            socket,
            sinks,
            stats,
        } = self;

        info!(
            "statsd listening on {} (flush every {:?}, percentile {})",
            socket.local_addr()?,
            config.flush_interval,
            config.percent_threshold
        );

        let (emitter, emitter_task) = spawn_emitter(
            sinks,
            config.backend_timeout,
            config.snapshot_queue_capacity,
        );
        let (aggregator, aggregator_task) = spawn_aggregator(&config, emitter, stats.clone());

        let permits = config.decode_concurrency;
        let decoders = Arc::new(Semaphore::new(permits));
        let samples = aggregator.sample_sender();
        let verbose = config.debug;
        let mut buf = vec![0u8; config.max_datagram_size];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = socket.recv_from(&mut buf) => {
                    let (len, peer) = match result {
                        Ok(received) => received,
                        Err(e) => {
                            stats.record_receive_error();
                            debug!("UDP receive failed: {}", e);
                            continue;
                        }
                    };
                    stats.record_packet();

                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        permit = decoders.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    let samples = samples.clone();
                    let stats = stats.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        decode_datagram(datagram, peer, samples, &stats, verbose).await;
                    });
                }
            }
        }

        info!("Shutting down, draining in-flight packets");
        drop(samples);
        // Every permit back means every decode task has queued its samples
        let all = u32::try_from(permits).unwrap_or(u32::MAX);
        let _ = decoders.acquire_many(all).await;

        aggregator.shutdown().await;
        drop(aggregator);
        if let Err(e) = aggregator_task.await {
            warn!("Aggregator task failed: {}", e);
        }
        if let Err(e) = emitter_task.await {
            warn!("Emitter task failed: {}", e);
        }

        stats.log_summary();
        Ok(())
    }
}

async fn decode_datagram(
    datagram: Bytes,
    peer: SocketAddr,
    samples: mpsc::Sender<MetricSample>,
    stats: &ServerStats,
    verbose: bool,
) {
    let decoded = decode(&datagram);
    if verbose {
        debug!("Packet from {}: {}", peer, decoded.sanitized());
    }

    let mut count = 0u64;
    for sample in decoded {
        if samples.send(sample).await.is_err() {
            break;
        }
        count += 1;
    }
    if count == 0 {
        debug!("No samples in packet from {}", peer);
    }
    stats.record_decoded(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemorySink;
    use crate::metrics::{PointValue, StatField};
    use std::time::Duration;

    fn test_config() -> AggregatorConfig {
        AggregatorConfig {
            listen_address: "127.0.0.1:0".to_string(),
            flush_interval: Duration::from_secs(3600),
            ..AggregatorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = AggregatorConfig {
            listen_address: taken.local_addr().unwrap().to_string(),
            ..test_config()
        };
        let err = StatsdServer::bind(config, Vec::new()).await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = AggregatorConfig {
            percent_threshold: 0,
            ..test_config()
        };
        let err = StatsdServer::bind(config, Vec::new()).await.err().unwrap();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_received_samples() {
        let memory = InMemorySink::new();
        let server = StatsdServer::bind(test_config(), vec![Arc::new(memory.clone())])
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let stats = server.stats();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hits:3|c\nhits:2|c", addr).await.unwrap();

        // Wait until the datagram has been read before cancelling
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while stats.snapshot().samples_decoded < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        task.await.unwrap().unwrap();

        let last = memory.last().unwrap();
        assert_eq!(last.get("hits", StatField::Count), Some(PointValue::Integer(5)));
        assert_eq!(stats.snapshot().packets_received, 1);
    }

    #[tokio::test]
    async fn test_no_backends_configured() {
        let sinks = configured_sinks(&test_config()).await.unwrap();
        assert!(sinks.is_empty());
    }
}
