//! Ingestion counters
//!
//! Shared between the receive loop, decode tasks and the aggregator.
//! Relaxed atomics; values are only read for logging.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

#[derive(Debug, Default)]
pub struct ServerStats {
    packets_received: AtomicU64,
    samples_decoded: AtomicU64,
    empty_packets: AtomicU64,
    receive_errors: AtomicU64,
    flushes: AtomicU64,
    snapshots_dropped: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub samples_decoded: u64,
    /// Datagrams that produced no sample
    pub empty_packets: u64,
    pub receive_errors: u64,
    pub flushes: u64,
    pub snapshots_dropped: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of decoding one datagram
    pub fn record_decoded(&self, samples: u64) {
        if samples == 0 {
            self.empty_packets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.samples_decoded.fetch_add(samples, Ordering::Relaxed);
        }
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, submitted: bool) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        if !submitted {
            self.snapshots_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            empty_packets: self.empty_packets.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            packets_received = s.packets_received,
            samples_decoded = s.samples_decoded,
            empty_packets = s.empty_packets,
            receive_errors = s.receive_errors,
            flushes = s.flushes,
            snapshots_dropped = s.snapshots_dropped,
            "Ingestion summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ServerStats::new();
        stats.record_packet();
        stats.record_packet();
        stats.record_decoded(3);
        stats.record_decoded(0);
        stats.record_receive_error();
        stats.record_flush(true);
        stats.record_flush(false);

        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                packets_received: 2,
                samples_decoded: 3,
                empty_packets: 1,
                receive_errors: 1,
                flushes: 2,
                snapshots_dropped: 1,
            }
        );
    }
}
