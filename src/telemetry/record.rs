// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::TransportSample;

/// Descriptive labels attached to every record.
///
/// These are plain parameters; the caller decides where they come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels {
    /// Experiment scenario name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Name of the host or container this end runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

/// The finished account of one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// When the connection was opened (or accepted)
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// When the connection ended
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
    /// Bytes we sent, including frame headers
    pub bytes_sent: u64,
    /// Bytes we received, including frame headers
    pub bytes_received: u64,
    /// `end_time - start_time`
    pub duration_seconds: f64,
    /// Total bytes in both directions per second; zero if the duration was zero
    pub throughput_bps: f64,
    /// The peer
    pub remote_addr: String,
    /// What happened on the connection (the last operation)
    pub operation: String,
    /// Labels
    #[serde(flatten)]
    pub labels: Labels,
    /// Transport samples, in the order they were taken
    #[serde(rename = "tcp_samples", default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<TransportSample>,
}

/// A connection record under construction.
///
/// [`finish`](Self::finish) consumes it, so a record can only be finalized once.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    start_time: OffsetDateTime,
    bytes_sent: u64,
    bytes_received: u64,
    remote_addr: String,
    operation: String,
    labels: Labels,
}

impl PendingRecord {
    /// Starts a record now
    #[must_use]
    pub fn new(remote_addr: impl Into<String>, operation: impl Into<String>, labels: Labels) -> Self {
        Self {
            start_time: OffsetDateTime::now_utc(),
            bytes_sent: 0,
            bytes_received: 0,
            remote_addr: remote_addr.into(),
            operation: operation.into(),
            labels,
        }
    }

    /// Counts outbound bytes
    pub fn add_sent(&mut self, bytes: u64) {
        self.bytes_sent += bytes;
    }

    /// Counts inbound bytes
    pub fn add_received(&mut self, bytes: u64) {
        self.bytes_received += bytes;
    }

    /// Sets the operation label
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.operation = operation.into();
    }

    /// Bytes sent so far
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Bytes received so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Closes the record at the current time
    #[must_use]
    pub fn finish(self, samples: Vec<TransportSample>) -> ConnectionRecord {
        let end_time = OffsetDateTime::now_utc();
        let duration_seconds = (end_time - self.start_time).as_seconds_f64().max(0.0);
        #[allow(clippy::cast_precision_loss)]
        let throughput_bps = if duration_seconds > 0.0 {
            (self.bytes_sent + self.bytes_received) as f64 / duration_seconds
        } else {
            0.0
        };
        ConnectionRecord {
            start_time: self.start_time,
            end_time,
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            duration_seconds,
            throughput_bps,
            remote_addr: self.remote_addr,
            operation: self.operation,
            labels: self.labels,
            samples,
        }
    }
}
