// Connection record sinks
// (c) 2024 Ross Younger

use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Context as _;
use time::macros::format_description;
use tracing::{debug, warn};

use super::ConnectionRecord;

/// Receives one finished [`ConnectionRecord`] per connection.
///
/// Sinks must not fail the caller; problems are theirs to report.
pub trait TelemetrySink: Send + Sync {
    /// Accepts a finished record
    fn record(&self, record: ConnectionRecord);
}

/// Hands a record to `sink` on the blocking thread pool.
///
/// Sinks may do file I/O, so async code should deliver records this way.
/// Returns once the sink has taken the record.
pub async fn deliver(sink: &Arc<dyn TelemetrySink>, record: ConnectionRecord) {
    let sink = Arc::clone(sink);
    if let Err(e) = tokio::task::spawn_blocking(move || sink.record(record)).await {
        warn!("connection record lost: {e}");
    }
}

/// Logs a summary of each record, and optionally saves each as a JSON document.
///
/// Documents are written to `<dir>/<scenario>/connection_<scenario>_<container>_<timestamp>.json`.
#[derive(Debug, Clone, Default)]
pub struct RecordLogger {
    json_dir: Option<PathBuf>,
    summary: bool,
}

impl RecordLogger {
    /// Creates a logger. `json_dir` of None disables JSON output.
    #[must_use]
    pub fn new(json_dir: Option<PathBuf>, summary: bool) -> Self {
        Self { json_dir, summary }
    }

    /// Writes a record as JSON under `dir`, returning the path written
    pub fn write_json(dir: &Path, record: &ConnectionRecord) -> anyhow::Result<PathBuf> {
        let scenario = filename_safe(record.labels.scenario.as_deref());
        let container = filename_safe(record.labels.container_name.as_deref());
        let stamp = record.start_time.format(format_description!(
            "[year][month][day]_[hour][minute][second]_[subsecond digits:3]"
        ))?;

        let dir = dir.join(&scenario);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let path = dir.join(format!("connection_{scenario}_{container}_{stamp}.json"));

        let file = File::create(&path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(path)
    }
}

impl TelemetrySink for RecordLogger {
    fn record(&self, record: ConnectionRecord) {
        if let Some(dir) = &self.json_dir {
            match Self::write_json(dir, &record) {
                Ok(path) => debug!("connection log saved: {}", path.display()),
                Err(e) => warn!("unable to save connection log: {e:#}"),
            }
        }
        if self.summary {
            crate::util::stats::output_summary(&record);
        }
    }
}

fn filename_safe(label: Option<&str>) -> String {
    match label {
        None | Some("") => "unknown".into(),
        Some(s) => s
            .chars()
            .map(|c| match c {
                ' ' | '/' | ':' | '\\' => '_',
                c => c,
            })
            .collect(),
    }
}

/// Keeps records in memory, for embedding and testing
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ConnectionRecord>>>,
}

impl MemorySink {
    /// Creates an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything received so far
    #[must_use]
    pub fn records(&self) -> Vec<ConnectionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: ConnectionRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
