//! Backend Sinks
//!
//! A sink receives every [`FlushSnapshot`] and writes it to one downstream
//! monitoring system. Sinks are independent: any number may be active,
//! and a failing sink never affects aggregation or the other sinks.
//!
//! Implementations:
//! - `GraphiteSink`: plaintext `name value timestamp` lines over TCP
//! - `GangliaSink`: gmetric XDR packets over UDP to one or more gmond hosts
//! - `InMemorySink`: records snapshots, for tests and dry runs

use std::future::Future;
use std::io::Error as IoError;
use std::pin::Pin;
use std::time::Duration;

use crate::metrics::FlushSnapshot;

pub mod emitter;
pub mod ganglia;
pub mod graphite;
pub mod in_memory;

pub use emitter::{spawn_emitter, EmitterHandle};
pub use ganglia::{GangliaSink, GmetricType};
pub use graphite::GraphiteSink;
pub use in_memory::InMemorySink;

/// Error type for backend writes
#[derive(Debug)]
pub enum BackendError {
    /// Could not open a connection to the backend
    Connect { address: String, source: IoError },
    /// I/O error after the connection was established
    Io(IoError),
    /// Backend address did not resolve to a usable socket address
    Resolve(String),
    /// The write did not finish within the configured bound
    Timeout(Duration),
    /// The sink or its channel has shut down
    Closed,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Connect { address, source } => {
                write!(f, "failed to connect to {}: {}", address, source)
            }
            BackendError::Io(e) => write!(f, "backend I/O error: {}", e),
            BackendError::Resolve(msg) => write!(f, "cannot resolve backend address: {}", msg),
            BackendError::Timeout(d) => write!(f, "backend write timed out after {:?}", d),
            BackendError::Closed => write!(f, "backend closed"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Connect { source, .. } => Some(source),
            BackendError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for BackendError {
    fn from(e: IoError) -> Self {
        BackendError::Io(e)
    }
}

/// Downstream writer for flush snapshots
pub trait BackendSink: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Write one snapshot. Failures lose this snapshot for this sink only.
    fn emit<'a>(
        &'a self,
        snapshot: &'a FlushSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), BackendError>> + Send + 'a>>;
}
