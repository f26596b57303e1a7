//! Aggregator Actor - the single owner of the aggregate store
//!
//! Decode tasks feed samples through a bounded channel; the actor applies
//! them in arrival order and flushes on a fixed interval. Nothing else
//! touches the store, so no locking is needed.
//!
//! ```text
//! decode task ──┐
//! decode task ──┤──► AggregatorActor ──reduce──► EmitterHandle::submit
//! decode task ──┘         ▲
//!                      interval tick
//! ```
//!
//! A flush never waits on a backend: the snapshot is handed to the emitter
//! and the actor returns to the sample queue.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::config::AggregatorConfig;
use super::stats::ServerStats;
use crate::backends::EmitterHandle;
use crate::metrics::{AggregateStore, FlushReducer, FlushSnapshot, MetricSample};

/// Control messages for the aggregator actor
pub enum AggregatorMessage {
    /// Flush now and return the snapshot (it is also sent to the emitter)
    Flush {
        response_tx: oneshot::Sender<FlushSnapshot>,
    },
    /// Drain queued samples, flush one last time and stop
    Shutdown { response_tx: oneshot::Sender<()> },
}

/// Actor that owns the store and the flush timer
pub struct AggregatorActor {
    store: AggregateStore,
    reducer: FlushReducer,
    emitter: EmitterHandle,
    stats: Arc<ServerStats>,
    verbose: bool,
    samples: mpsc::Receiver<MetricSample>,
    control: mpsc::UnboundedReceiver<AggregatorMessage>,
}

impl AggregatorActor {
    fn new(
        reducer: FlushReducer,
        emitter: EmitterHandle,
        stats: Arc<ServerStats>,
        verbose: bool,
        samples: mpsc::Receiver<MetricSample>,
        control: mpsc::UnboundedReceiver<AggregatorMessage>,
    ) -> Self {
        AggregatorActor {
            store: AggregateStore::new(),
            reducer,
            emitter,
            stats,
            verbose,
            samples,
            control,
        }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        let interval = self.reducer.interval();
        // First tick one full interval after start
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut samples_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain_queued();
                    let snapshot = self.take_snapshot();
                    self.publish(snapshot);
                }
                sample = self.samples.recv(), if samples_open => {
                    match sample {
                        Some(sample) => self.apply(sample),
                        None => samples_open = false,
                    }
                }
                msg = self.control.recv() => {
                    match msg {
                        Some(AggregatorMessage::Flush { response_tx }) => {
                            self.drain_queued();
                            let snapshot = self.take_snapshot();
                            self.publish(snapshot.clone());
                            let _ = response_tx.send(snapshot);
                        }
                        Some(AggregatorMessage::Shutdown { response_tx }) => {
                            self.final_flush();
                            let _ = response_tx.send(());
                            break;
                        }
                        None => {
                            self.final_flush();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn apply(&mut self, sample: MetricSample) {
        if self.verbose {
            debug!("Sample: {:?}", sample);
        }
        self.store.apply(sample);
    }

    /// Apply every sample already queued so a snapshot covers all sends
    /// that completed before it was requested
    fn drain_queued(&mut self) {
        while let Ok(sample) = self.samples.try_recv() {
            self.apply(sample);
        }
    }

    fn take_snapshot(&mut self) -> FlushSnapshot {
        self.reducer.reduce(&mut self.store, unix_now())
    }

    fn publish(&self, snapshot: FlushSnapshot) {
        if self.verbose {
            debug!(
                "Flush at {}: {} points, numStats={}",
                snapshot.timestamp,
                snapshot.len(),
                snapshot.num_stats()
            );
        }
        let submitted = self.emitter.submit(snapshot);
        self.stats.record_flush(submitted);
    }

    fn final_flush(&mut self) {
        self.drain_queued();
        let snapshot = self.take_snapshot();
        info!(
            "Aggregator shutting down, final flush of {} points",
            snapshot.len()
        );
        self.publish(snapshot);
    }
}

/// Seconds since the Unix epoch, shared by every point of one flush
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

// ============================================================================
// AggregatorHandle - public interface for interacting with the aggregator
// ============================================================================

/// Handle for sending samples and control messages to the aggregator
#[derive(Clone)]
pub struct AggregatorHandle {
    samples: mpsc::Sender<MetricSample>,
    control: mpsc::UnboundedSender<AggregatorMessage>,
}

impl AggregatorHandle {
    /// Queue a sample, waiting for space when the queue is full
    ///
    /// Returns false once the aggregator has stopped.
    pub async fn send(&self, sample: MetricSample) -> bool {
        self.samples.send(sample).await.is_ok()
    }

    /// Sender for decode tasks
    pub fn sample_sender(&self) -> mpsc::Sender<MetricSample> {
        self.samples.clone()
    }

    /// Flush immediately, outside the timer
    pub async fn flush(&self) -> Option<FlushSnapshot> {
        let (response_tx, response_rx) = oneshot::channel();
        self.control
            .send(AggregatorMessage::Flush { response_tx })
            .ok()?;
        response_rx.await.ok()
    }

    /// Graceful shutdown, waits for the final flush to be submitted
    pub async fn shutdown(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .control
            .send(AggregatorMessage::Shutdown { response_tx })
            .is_ok()
        {
            let _ = response_rx.await;
        }
    }
}

/// Spawn an aggregator actor and return its handle + join handle
pub fn spawn_aggregator(
    config: &AggregatorConfig,
    emitter: EmitterHandle,
    stats: Arc<ServerStats>,
) -> (AggregatorHandle, tokio::task::JoinHandle<()>) {
    debug_assert!(config.sample_queue_capacity > 0);
    let (sample_tx, sample_rx) = mpsc::channel(config.sample_queue_capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let reducer = FlushReducer::new(
        config.flush_interval,
        config.percent_threshold,
        config.percentile_mode,
    );
    let actor = AggregatorActor::new(
        reducer,
        emitter,
        stats,
        config.debug,
        sample_rx,
        control_rx,
    );
    let task = tokio::spawn(actor.run());

    let handle = AggregatorHandle {
        samples: sample_tx,
        control: control_tx,
    };
    (handle, task)
}
