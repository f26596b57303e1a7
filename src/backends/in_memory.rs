//! In-memory sink
//!
//! Records every snapshot it receives. Used by tests and by embedders
//! that consume aggregates in-process.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BackendError, BackendSink};
use crate::metrics::FlushSnapshot;

/// Sink that keeps snapshots in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    snapshots: Arc<Mutex<Vec<FlushSnapshot>>>,
    notify: Arc<Notify>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every snapshot received so far
    pub fn snapshots(&self) -> Vec<FlushSnapshot> {
        self.snapshots.lock().clone()
    }

    pub fn last(&self) -> Option<FlushSnapshot> {
        self.snapshots.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }

    /// Wait until at least `count` snapshots arrived, or the timeout passes
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

impl BackendSink for InMemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn emit<'a>(
        &'a self,
        snapshot: &'a FlushSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>> {
        Box::pin(async move {
            self.snapshots.lock().push(snapshot.clone());
            self.notify.notify_waiters();
            Ok(())
        })
    }
}
