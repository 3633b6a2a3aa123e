//! Tracing helpers
// (c) 2024 Ross Younger

use std::{fs::File, sync::Arc};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

const STANDARD_ENV_VAR: &str = "RUST_LOG";
const LOG_FILE_DETAIL_ENV_VAR: &str = "RUST_LOG_FILE_DETAIL";

/// Result type for `filter_for()`
struct FilterResult {
    filter: EnvFilter,
    used_env: bool, // Did we use the environment variable we were requested to?
}

/// Log filter setup:
/// Use a given environment variable; if it wasn't present, log only our own items at a given trace level.
fn filter_for(trace_level: &str, key: &str) -> anyhow::Result<FilterResult> {
    EnvFilter::try_from_env(key)
        .map(|filter| FilterResult {
            filter,
            used_env: true,
        })
        .or_else(|e| {
            // The env var was unset or invalid. Which is it?
            if std::env::var(key).is_ok() {
                anyhow::bail!("{key} (set in environment) was invalid: {e}");
            }
            Ok(FilterResult {
                filter: EnvFilter::new(format!("tcpbench={trace_level}")),
                used_env: false,
            })
        })
}

/// Set up rust tracing, to stderr and optionally to file.
///
/// By default we log only our own events, at a given trace level.
/// This can be overridden by setting `RUST_LOG`.
/// The log file gets the same events unless `RUST_LOG_FILE_DETAIL` is set (same semantics).
///
/// **CAUTION:** If this function fails, tracing won't be set up; callers must take extra care to report the error.
pub fn setup(trace_level: &str, filename: Option<&str>) -> anyhow::Result<()> {
    let mut layers = Vec::new();

    let filter = filter_for(trace_level, STANDARD_ENV_VAR)?;
    // If we used the environment variable, show log targets; if we did not, we're only logging ourselves, so do not show targets.
    layers.push(
        fmt::layer()
            .compact()
            .with_target(filter.used_env)
            .with_writer(std::io::stderr)
            .with_filter(filter.filter)
            .boxed(),
    );

    if let Some(filename) = filename {
        let out_file = Arc::new(
            File::create(filename).with_context(|| format!("Failed to open log file {filename}"))?,
        );
        let filter = if std::env::var(LOG_FILE_DETAIL_ENV_VAR).is_ok() {
            FilterResult {
                filter: EnvFilter::try_from_env(LOG_FILE_DETAIL_ENV_VAR)?,
                used_env: true,
            }
        } else {
            filter_for(trace_level, STANDARD_ENV_VAR)?
        };
        layers.push(
            fmt::layer()
                .with_writer(out_file)
                .with_target(filter.used_env)
                .compact()
                .with_ansi(false)
                .with_filter(filter.filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .context("tracing was already set up")?;
    Ok(())
}

/// Tests share a process, so only the first caller installs a subscriber.
#[cfg(test)]
pub(crate) fn setup_tracing_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod test {
    #[test]
    fn filters() {
        let f = super::filter_for("debug", "TCPBENCH_TEST_UNSET_VARIABLE").unwrap();
        assert!(!f.used_env);
        assert_eq!(f.filter.to_string(), "tcpbench=debug");
    }
}
