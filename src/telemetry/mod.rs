// (c) 2024 Ross Younger

//! Transport telemetry
//!
//! While a transfer is in flight we watch the kernel's view of the TCP connection:
//! round-trip time, congestion window, slow-start threshold, retransmissions and
//! byte/segment counters. Each observation is a [`TransportSample`].
//!
//! * A [`TransportSampler`] owns the sample sequence for one connection. It can be
//!   sampled explicitly, and can run a periodic background task while the foreground
//!   is blocked in a large send.
//! * At the end of a connection its counters and samples become a [`ConnectionRecord`],
//!   which is handed to a [`TelemetrySink`], usually through [`deliver`].
//!
//! All of this is best-effort. If the platform cannot tell us anything, we simply end
//! up with no samples; transfers never fail because of telemetry.

mod record;
mod sample;
mod sampler;
mod sink;

pub use record::{ConnectionRecord, Labels, PendingRecord};
pub use sample::TransportSample;
pub use sampler::{SamplingPolicy, TransportSampler};
pub use sink::{deliver, MemorySink, RecordLogger, TelemetrySink};
