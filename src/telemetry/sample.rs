// (c) 2024 Ross Younger

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One point-in-time observation of a connection's transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSample {
    /// When the sample was taken
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Smoothed round-trip time, microseconds
    #[serde(rename = "rtt_us")]
    pub round_trip_time: u32,
    /// Round-trip time variance, microseconds
    #[serde(rename = "rtt_var_us")]
    pub round_trip_time_variance: u32,
    /// Congestion window, segments
    #[serde(rename = "snd_cwnd")]
    pub congestion_window: u32,
    /// Slow-start threshold, segments
    #[serde(rename = "snd_ssthresh")]
    pub slow_start_threshold: u32,
    /// Retransmissions of the segment currently outstanding
    #[serde(rename = "retransmits")]
    pub current_retransmits: u8,
    /// Total retransmissions over the life of the connection (never decreases)
    #[serde(rename = "total_retrans")]
    pub retransmit_count: u32,
    /// Bytes acknowledged by the peer
    #[serde(rename = "bytes_acked")]
    pub bytes_acknowledged: u64,
    /// Bytes received from the peer
    pub bytes_received: u64,
    /// Segments sent
    #[serde(rename = "segs_out")]
    pub segments_out: u32,
    /// Segments received
    #[serde(rename = "segs_in")]
    pub segments_in: u32,
}

impl TransportSample {
    /// Round-trip time in milliseconds
    #[must_use]
    pub fn rtt_ms(&self) -> f64 {
        f64::from(self.round_trip_time) / 1000.0
    }
}
