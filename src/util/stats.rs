// Statistics processing and output
// (c) 2024 Ross Younger

use human_repr::{HumanCount, HumanDuration};
use std::{fmt::Display, time::Duration};
use tracing::{info, warn};

use crate::telemetry::ConnectionRecord;

/// Human friendly output helper
#[derive(Debug, Clone, Copy)]
pub struct DataRate {
    /// Bytes per second; if None, we were unable to compute a rate.
    rate: Option<f64>,
}

impl DataRate {
    /// Computes a rate, if it is meaningful to do so
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn new(bytes: u64, time: Option<Duration>) -> Self {
        match time {
            None => Self { rate: None },
            Some(time) if time.is_zero() => Self { rate: None }, // divide by zero is not meaningful
            Some(time) => Self {
                rate: Some((bytes as f64) / time.as_secs_f64()),
            },
        }
    }
    /// Bytes per second
    #[must_use]
    pub fn byte_rate(&self) -> Option<f64> {
        self.rate
    }
    /// Bits per second
    #[must_use]
    pub fn bit_rate(&self) -> Option<f64> {
        self.rate.map(|r| r * 8.)
    }
}

impl Display for DataRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use human_repr::HumanThroughput as _;
        match self.byte_rate() {
            None => f.write_str("unknown"),
            Some(rate) => rate.human_throughput_bytes().fmt(f),
        }
    }
}

/// Logs a human-readable summary of a finished connection
pub(crate) fn output_summary(record: &ConnectionRecord) {
    let duration = Duration::try_from_secs_f64(record.duration_seconds).ok();
    let rate = DataRate::new(record.bytes_sent + record.bytes_received, duration);
    info!(
        "{remote} {op}: {sent} sent, {received} received in {elapsed}; average {rate}",
        remote = record.remote_addr,
        op = record.operation,
        sent = record.bytes_sent.human_count_bytes(),
        received = record.bytes_received.human_count_bytes(),
        elapsed = duration.map_or_else(|| "unknown".to_string(), |d| d.human_duration().to_string()),
    );

    let (Some(first), Some(last)) = (record.samples.first(), record.samples.last()) else {
        return;
    };
    info!(
        "{n} TCP samples; RTT {rtt0:.2} ms -> {rtt1:.2} ms, cwnd {cwnd0} -> {cwnd1}, ssthresh {ss0} -> {ss1}",
        n = record.samples.len(),
        rtt0 = first.rtt_ms(),
        rtt1 = last.rtt_ms(),
        cwnd0 = first.congestion_window,
        cwnd1 = last.congestion_window,
        ss0 = first.slow_start_threshold,
        ss1 = last.slow_start_threshold,
    );
    if last.retransmit_count > 0 {
        warn!(
            "Retransmissions: {}",
            u64::from(last.retransmit_count).human_count_bare()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::DataRate;
    use std::time::Duration;

    #[test]
    fn no_rate_without_time() {
        assert_eq!(DataRate::new(1234, None).to_string(), "unknown");
        assert_eq!(
            DataRate::new(1234, Some(Duration::ZERO)).to_string(),
            "unknown"
        );
        assert!(DataRate::new(1, Some(Duration::ZERO)).bit_rate().is_none());
    }

    #[test]
    fn rates() {
        let r = DataRate::new(42, Some(Duration::from_secs(1)));
        assert_eq!(r.to_string(), "42B/s");
        assert_eq!(r.bit_rate(), Some(336.0));
        let r = DataRate::new(10_000_000_000, Some(Duration::from_secs(500)));
        assert_eq!(r.to_string(), "20MB/s");
    }
}
