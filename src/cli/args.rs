// tcpbench command-line arguments
// (c) 2024 Ross Younger

use std::path::PathBuf;

use clap::Parser;

use crate::config::ConfigOverrides;

/// Options that make us do something other than run a client command
const MODE_OPTIONS: &[&str] = &["server", "show_config", "config_files"];

#[derive(Debug, Parser, Clone)]
#[command(
    author,
    version(crate::VERSION),
    about,
    before_help = "e.g.   tcpbench --server --file-dir /srv/files\n       tcpbench --host my-server put some/file",
    infer_long_args(true)
)]
#[command(help_template(
    "\
{name} version {version}
{about-with-newline}
{usage-heading} {usage}
{before-help}
{all-args}{after-help}
"
))]
#[command(styles=super::styles::CLAP_STYLES)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct CliArgs {
    // MODE SELECTION ======================================================================
    /// Operates in server mode, accepting connections until interrupted
    #[arg(long, help_heading("Modes"))]
    pub server: bool,

    /// Outputs the merged configuration, and where each value came from, then exits
    #[arg(long, help_heading("Configuration"), conflicts_with("config_files"))]
    pub show_config: bool,

    /// Outputs the configuration files we look for, then exits
    #[arg(long, help_heading("Configuration"))]
    pub config_files: bool,

    // CONFIGURATION =======================================================================
    /// Reads an additional configuration file (TOML), which must exist
    #[arg(short('c'), long, value_name("FILE"), help_heading("Configuration"))]
    pub config: Option<PathBuf>,

    /// Server mode: address to listen on [default: 0.0.0.0].
    /// Client mode: server to connect to [default: localhost].
    #[arg(long, value_name("HOST"), help_heading("Connection"))]
    pub host: Option<String>,

    /// TCP port [default: 8080]
    #[arg(short('p'), long, help_heading("Connection"))]
    pub port: Option<u16>,

    /// Where the server stores uploaded files [default: ./files]
    #[arg(long, value_name("DIR"), requires("server"), help_heading("Server"))]
    pub file_dir: Option<String>,

    /// Where connection records are written [default: ./logs]
    #[arg(long, value_name("DIR"), help_heading("Records"))]
    pub log_dir: Option<String>,

    /// Does not write JSON connection records
    #[arg(long, help_heading("Records"))]
    pub no_json: bool,

    /// Scenario label for connection records
    #[arg(long, help_heading("Records"))]
    pub scenario: Option<String>,

    /// Host or container label for connection records
    #[arg(long, help_heading("Records"))]
    pub container_name: Option<String>,

    // OUTPUT ==============================================================================
    /// Enables detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=tcpbench=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, conflicts_with("quiet"), help_heading("Output"))]
    pub debug: bool,

    /// Reports only errors
    #[arg(short, long, action, help_heading("Output"))]
    pub quiet: bool,

    /// Logs to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(short('l'), long, value_name("FILE"), help_heading("Output"))]
    pub log_file: Option<String>,

    // POSITIONAL ARGUMENTS ================================================================
    /// Client command: `list` or `put FILE`.
    ///
    /// If no command is given, runs an interactive shell.
    #[arg(
        conflicts_with_all(MODE_OPTIONS),
        value_name = "COMMAND",
        trailing_var_arg(true)
    )]
    pub command: Vec<String>,
}

impl CliArgs {
    /// The options that override configuration files
    pub(crate) fn overrides(&self) -> ConfigOverrides {
        let (listen_host, server_host) = if self.server {
            (self.host.clone(), None)
        } else {
            (None, self.host.clone())
        };
        ConfigOverrides {
            listen_host,
            server_host,
            port: self.port,
            file_dir: self.file_dir.clone(),
            log_dir: self.log_dir.clone(),
            json_records: self.no_json.then_some(false),
            scenario: self.scenario.clone(),
            container_name: self.container_name.clone(),
        }
    }

    /// Tracing level implied by `--debug` / `--quiet`
    pub(crate) fn trace_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }
}
