//! Configuration structure
// (c) 2024 Ross Younger

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::telemetry::SamplingPolicy;

/// The set of configurable options supported by tcpbench.
///
/// **Note:** The implementation of `default()` for this struct returns the hard-wired configuration defaults.
///
/// String labels use the empty string for "not set"; see [`Manager::labels`](super::Manager::labels)
/// for where unset labels are filled in from.
// Maintainer note: None of the members of this struct should be Option<anything>.
// Optionality lives in ConfigOverrides, which only the CLI uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Address the server listens on
    pub listen_host: String,
    /// Server the client connects to
    pub server_host: String,
    /// TCP port, both ends
    pub port: u16,
    /// Where the server keeps uploaded files
    pub file_dir: String,
    /// Where connection records are written
    pub log_dir: String,
    /// Whether to write a JSON document per connection
    pub json_records: bool,
    /// Experiment scenario label
    pub scenario: String,
    /// Host or container label
    pub container_name: String,
    /// Periodic sampling interval during large uploads, in milliseconds
    pub sample_interval_ms: u64,
    /// Uploads larger than this many bytes are sampled periodically
    pub sample_threshold: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".into(),
            server_host: "localhost".into(),
            port: 8080,
            file_dir: "./files".into(),
            log_dir: "./logs".into(),
            json_records: true,
            scenario: String::new(),
            container_name: String::new(),
            sample_interval_ms: 100,
            sample_threshold: SamplingPolicy::DEFAULT_THRESHOLD,
        }
    }
}

impl Configuration {
    /// `host:port` for the server to bind
    #[must_use]
    pub fn listen_address(&self) -> String {
        join_host_port(&self.listen_host, self.port)
    }

    /// `host:port` for the client to connect to
    #[must_use]
    pub fn server_address(&self) -> String {
        join_host_port(&self.server_host, self.port)
    }

    /// Sampling policy for client uploads
    #[must_use]
    pub fn sampling_policy(&self) -> SamplingPolicy {
        SamplingPolicy {
            interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            threshold: self.sample_threshold,
        }
    }

    /// Directory for JSON connection records, if they are enabled
    #[must_use]
    pub fn json_dir(&self) -> Option<PathBuf> {
        self.json_records.then(|| PathBuf::from(&self.log_dir))
    }
}

/// Bare IPv6 addresses need brackets
fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Values given on the command line. Anything left as None is taken from lower-priority sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) listen_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) server_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) file_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) log_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) json_records: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) container_name: Option<String>,
}

#[cfg(test)]
mod test {
    use super::Configuration;
    use std::time::Duration;

    #[test]
    fn addresses() {
        let mut c = Configuration::default();
        assert_eq!(c.listen_address(), "0.0.0.0:8080");
        assert_eq!(c.server_address(), "localhost:8080");
        c.server_host = "::1".into();
        c.port = 9;
        assert_eq!(c.server_address(), "[::1]:9");
    }

    #[test]
    fn policy_and_json() {
        let mut c = Configuration::default();
        assert_eq!(c.sampling_policy().interval, Duration::from_millis(100));
        assert_eq!(c.sampling_policy().threshold, 1024 * 1024);
        assert_eq!(c.json_dir().unwrap().to_str(), Some("./logs"));
        c.json_records = false;
        c.sample_interval_ms = 0;
        assert!(c.json_dir().is_none());
        assert_eq!(c.sampling_policy().interval, Duration::from_millis(1));
    }
}
