// (c) 2024 Ross Younger
//! # Configuration management
//!
//! tcpbench obtains run-time configuration from the following sources, lowest priority first:
//! 1. Hard-wired defaults
//! 2. The system-wide configuration file, `/etc/tcpbench.toml`
//! 3. The user's configuration file, `~/.tcpbench.toml`
//! 4. A file named with `--config`
//! 5. Environment variables prefixed `TCPBENCH_` (for example `TCPBENCH_PORT=9000`)
//! 6. Command-line options
//!
//! Run `tcpbench --show-config` to see the merged result and where each value came from.
//!
//! ## File format
//!
//! Configuration files are TOML, with the field names of [`Configuration`]:
//!
//! ```toml
//! port = 9000
//! log_dir = "/var/log/tcpbench"
//! scenario = "high-latency"
//! sample_interval_ms = 50
//! ```
//!
//! ## Labels
//!
//! The `scenario` and `container_name` labels are attached to every connection record.
//! If no configuration source sets them, they are taken from (first match wins)
//! the `SCENARIO` / `CONTAINER_NAME` environment variables, `HOSTNAME` (container name only),
//! the marker files `.scenario` / `.container_name` in the log directory,
//! and finally the system host name (container name only).

mod structure;
pub use structure::{ConfigOverrides, Configuration};

mod manager;
pub use manager::Manager;
