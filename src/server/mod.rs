//! File transfer server
// (c) 2024 Ross Younger

use std::sync::Arc;

use crate::storage::Storage;
use crate::telemetry::{Labels, TelemetrySink};

mod dispatch;
pub use dispatch::{dispatch, Reply, NO_FILES, UNKNOWN_OPERATION};

mod main_loop;
pub use main_loop::{server_main, Server};

/// Everything a connection handler needs, shared between connections
#[derive(Clone)]
pub struct ServerContext {
    /// Where uploaded files go
    pub storage: Arc<dyn Storage>,
    /// Where finished connection records go
    pub sink: Arc<dyn TelemetrySink>,
    /// Labels for every record this server produces
    pub labels: Labels,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("storage", &self.storage)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}
