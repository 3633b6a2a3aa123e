//! tcpbench: file transfer over a framed TCP protocol, with congestion-control telemetry
// (c) 2024 Ross Younger

//! The client and server exchange length-prefixed frames (see [`protocol`]).
//! While an upload is in flight, the client polls the kernel's `TCP_INFO`
//! for the connection ([`telemetry::TransportSampler`]), and every connection
//! ends with a [`telemetry::ConnectionRecord`] handed to a [`telemetry::TelemetrySink`].

mod cli;
pub use cli::cli;
pub mod client;
pub mod config;
pub mod os;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod util;

/// Version string, including the git revision where known
pub const VERSION: &str = env!("TCPBENCH_VERSION_STRING");
