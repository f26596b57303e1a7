//! Emitter - fans flush snapshots out to every sink
//!
//! The aggregator hands each snapshot to the emitter and returns to
//! ingesting samples immediately; slow backends only delay the emitter.
//!
//! ```text
//! Aggregator ──try_send──► EmitterActor ──┬─► GraphiteSink  (timeout)
//!                                         ├─► GangliaSink   (timeout)
//!                                         └─► ...
//! ```
//!
//! The queue between them is bounded. When it is full the new snapshot is
//! dropped and counted, matching the no-buffering policy for failed
//! backend writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{BackendError, BackendSink};
use crate::metrics::FlushSnapshot;

/// Actor that owns the sinks and writes snapshots to them
pub struct EmitterActor {
    sinks: Vec<Arc<dyn BackendSink>>,
    timeout: Duration,
    rx: mpsc::Receiver<FlushSnapshot>,
}

impl EmitterActor {
    fn new(
        sinks: Vec<Arc<dyn BackendSink>>,
        timeout: Duration,
        rx: mpsc::Receiver<FlushSnapshot>,
    ) -> Self {
        EmitterActor { sinks, timeout, rx }
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        while let Some(snapshot) = self.rx.recv().await {
            emit_to_all(&self.sinks, &snapshot, self.timeout).await;
        }
        info!("Emitter shutting down");
    }
}

/// Write one snapshot to every sink concurrently, each bounded by `timeout`
///
/// Returns the number of sinks that failed.
pub async fn emit_to_all(
    sinks: &[Arc<dyn BackendSink>],
    snapshot: &FlushSnapshot,
    timeout: Duration,
) -> usize {
    let writes = sinks.iter().map(|sink| async move {
        let result = match tokio::time::timeout(timeout, sink.emit(snapshot)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(timeout)),
        };
        match result {
            Ok(()) => {
                debug!("Flushed {} points to {}", snapshot.len(), sink.name());
                true
            }
            Err(e) => {
                warn!("Flush to {} failed: {}", sink.name(), e);
                false
            }
        }
    });

    join_all(writes).await.into_iter().filter(|ok| !ok).count()
}

/// Handle for submitting snapshots to the emitter
#[derive(Clone)]
pub struct EmitterHandle {
    tx: mpsc::Sender<FlushSnapshot>,
    dropped: Arc<AtomicU64>,
}

impl EmitterHandle {
    /// Queue a snapshot without waiting
    ///
    /// Returns false when the snapshot was dropped (queue full or emitter gone).
    pub fn submit(&self, snapshot: FlushSnapshot) -> bool {
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(snapshot)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Emitter queue full, dropping snapshot of {} points at {}",
                    snapshot.len(),
                    snapshot.timestamp
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                error!("Emitter unavailable, snapshot dropped");
                false
            }
        }
    }

    /// Snapshots dropped because the emitter could not take them
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Spawn an emitter actor and return its handle + join handle
pub fn spawn_emitter(
    sinks: Vec<Arc<dyn BackendSink>>,
    timeout: Duration,
    capacity: usize,
) -> (EmitterHandle, tokio::task::JoinHandle<()>) {
    debug_assert!(capacity > 0, "emitter queue capacity must be positive");
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let actor = EmitterActor::new(sinks, timeout, rx);
    let task = tokio::spawn(actor.run());

    let handle = EmitterHandle {
        tx,
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (handle, task)
}
