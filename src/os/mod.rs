//! OS abstraction layer
// (c) 2024 Ross Younger

use crate::telemetry::TransportSample;

/// Access to a connection's kernel transport statistics.
///
/// Implementations are advisory instrumentation: any failure (unsupported
/// platform, not a TCP socket, socket already closed) yields `None`, never an error.
pub trait TransportStatistics: Send + Sync {
    /// Takes one snapshot of the connection's transport state
    fn transport_sample(&self) -> Option<TransportSample>;
}

/// A probe for platforms (or sockets) with no statistics facility.
/// It never produces a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatistics;

impl TransportStatistics for NoStatistics {
    fn transport_sample(&self) -> Option<TransportSample> {
        None
    }
}

#[cfg(any(unix, doc))]
mod unix;

#[cfg(any(unix, doc))]
pub use unix::SocketProbe;

static_assertions::assert_cfg!(unix, "This OS is not yet supported");
