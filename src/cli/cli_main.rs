// Main CLI entrypoint
// (c) 2024 Ross Younger

use std::{process::ExitCode, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tracing::{error, error_span, info, Instrument as _};

use super::args::CliArgs;
use crate::{
    client::{client_main, ClientContext},
    config::{Configuration, Manager},
    server::{server_main, ServerContext},
    storage::DirectoryStorage,
    telemetry::{Labels, RecordLogger, TelemetrySink},
    util::setup_tracing,
};

/// Main CLI entrypoint
pub fn cli() -> anyhow::Result<ExitCode> {
    let args = CliArgs::parse();
    if args.config_files {
        for file in Manager::config_files() {
            println!("{file}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut manager = Manager::new(args.config.as_deref());
    manager.apply_overrides(&args.overrides());
    if args.show_config {
        println!("{manager}");
        return Ok(ExitCode::SUCCESS);
    }

    setup_tracing(args.trace_level(), args.log_file.as_deref())
        .inspect_err(|e| eprintln!("{e:?}"))?;
    let config: Configuration = manager
        .get()
        .inspect_err(|e| error!("configuration error: {e}"))?;
    let labels = Manager::labels(&config);
    let sink: Arc<dyn TelemetrySink> = Arc::new(RecordLogger::new(config.json_dir(), true));

    if args.server {
        return run_server(&config, labels, sink);
    }
    run_client(&config, labels, sink, &args.command)
}

#[tokio::main(flavor = "current_thread")]
async fn run_client(
    config: &Configuration,
    labels: Labels,
    sink: Arc<dyn TelemetrySink>,
    command: &[String],
) -> anyhow::Result<ExitCode> {
    let ctx = ClientContext {
        server: config.server_address(),
        labels,
        sink,
        policy: config.sampling_policy(),
    };
    client_main(ctx, command)
        .await
        .inspect_err(|e| error!("{e}"))
        .or_else(|_| Ok(false))
        .map(|success| {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        })
}

#[tokio::main]
async fn run_server(
    config: &Configuration,
    labels: Labels,
    sink: Arc<dyn TelemetrySink>,
) -> anyhow::Result<ExitCode> {
    let storage = DirectoryStorage::new(&config.file_dir)
        .with_context(|| format!("failed to open file directory {}", config.file_dir))?;
    info!("Storing files in {}", storage.root().display());
    if let Some(dir) = config.json_dir() {
        info!("Writing connection records to {}", dir.display());
    }
    let context = ServerContext {
        storage: Arc::new(storage),
        sink,
        labels,
    };

    server_main(&config.listen_address(), context)
        .instrument(error_span!("SERVER"))
        .await
        .map(|()| ExitCode::SUCCESS)
        .inspect_err(|e| error!("{e:#}"))
}
