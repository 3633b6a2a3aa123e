//! tcpbench client
// (c) 2024 Ross Younger

use std::sync::Arc;

use crate::telemetry::{Labels, SamplingPolicy, TelemetrySink};

mod main_loop;
mod session;

pub use main_loop::{client_main, run_shell, Command};
pub use session::{list_files, put_file, ClientError, Session};

/// What a client needs to know to run
#[derive(Clone)]
pub struct ClientContext {
    /// Server address, `host:port`
    pub server: String,
    /// Labels for every record this client produces
    pub labels: Labels,
    /// Where finished connection records go
    pub sink: Arc<dyn TelemetrySink>,
    /// When and how often to sample during uploads
    pub policy: SamplingPolicy,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("server", &self.server)
            .field("labels", &self.labels)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
