//! Configuration file wrangling
// (c) 2024 Ross Younger

use super::{ConfigOverrides, Configuration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    value::Value,
    Figment, Metadata, Provider,
};
use serde::Deserialize;
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use crate::telemetry::Labels;
use tracing::{trace, warn};

// PATHS /////////////////////////////////////////////////////////////////////////////////////////////////////

const BASE_CONFIG_FILENAME: &str = "tcpbench.toml";
const ENV_PREFIX: &str = "TCPBENCH_";

fn user_config_path() -> Option<PathBuf> {
    // ~/.<filename> for now
    dirs::home_dir().map(|mut d| {
        d.push(format!(".{BASE_CONFIG_FILENAME}"));
        d
    })
}

fn system_config_path() -> PathBuf {
    Path::new("/etc").join(BASE_CONFIG_FILENAME)
}

// SYSTEM DEFAULTS //////////////////////////////////////////////////////////////////////////////////////////////

/// A [`figment::Provider`] that holds our set of fixed system default options
#[derive(Default)]
struct SystemDefault {}

impl SystemDefault {
    const META_NAME: &str = "default";
}

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        figment::Metadata::named(Self::META_NAME)
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(Configuration::default()).data()
    }
}

// CONFIG MANAGER /////////////////////////////////////////////////////////////////////////////////////////////

/// Processes and merges all possible configuration sources.
///
/// Later sources override earlier ones:
/// 1. Hard-wired defaults
/// 2. The system-wide configuration file (`/etc/tcpbench.toml`)
/// 3. The user's configuration file (`~/.tcpbench.toml`)
/// 4. A configuration file named on the command line
/// 5. `TCPBENCH_*` environment variables (e.g. `TCPBENCH_PORT=9000`)
/// 6. Command-line options
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    data: Figment,
}

fn add_optional_file(f: Figment, path: Option<PathBuf>, what: &str) -> Figment {
    let Some(path) = path else {
        warn!("could not determine {what} configuration file path");
        return f;
    };
    if !path.exists() {
        trace!("{what} configuration file {path:?} not present");
        return f;
    }
    f.merge(Toml::file(path.as_path()))
}

impl Default for Manager {
    /// Initialises this structure fully-empty (for new(), or testing)
    fn default() -> Self {
        Self {
            data: Figment::default(),
        }
    }
}

impl Manager {
    /// Initialises this structure, reading the system and user config files,
    /// then `explicit` if given (which must exist), then the environment.
    #[must_use]
    pub fn new(explicit: Option<&Path>) -> Self {
        let mut data = Figment::new().merge(SystemDefault::default());
        data = add_optional_file(data, Some(system_config_path()), "system");
        data = add_optional_file(data, user_config_path(), "user");
        let mut mgr = Self { data };
        if let Some(path) = explicit {
            mgr.merge_toml_file(path);
        }
        mgr.merge_provider(Env::prefixed(ENV_PREFIX));
        mgr
    }

    /// Returns the list of configuration files we look for, in order.
    #[must_use]
    pub fn config_files() -> Vec<String> {
        [Some(system_config_path()), user_config_path()]
            .into_iter()
            .flatten()
            .map(|p| p.to_string_lossy().into())
            .collect()
    }

    /// Testing/internal constructor, does not read files or the environment
    #[must_use]
    pub(crate) fn without_files() -> Self {
        Self {
            data: Figment::new().merge(SystemDefault::default()),
        }
    }

    /// Merges in a data set, which is some sort of [`figment::Provider`].
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Merges in a data set from a TOML file
    pub fn merge_toml_file<T>(&mut self, toml: T)
    where
        T: AsRef<Path>,
    {
        self.merge_provider(Toml::file_exact(toml.as_ref()));
    }

    /// Merges in command-line options
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        self.merge_provider(Serialized::defaults(overrides));
    }

    /// Attempts to extract a particular struct from the data.
    ///
    /// Within tcpbench, `T` is usually [`Configuration`], but it isn't intrinsically required to be.
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract::<T>()
    }

    /// Works out the record labels for a configuration, filling in any that are unset
    /// from the process environment, marker files in the log directory, and the host name.
    #[must_use]
    pub fn labels(config: &Configuration) -> Labels {
        resolve_labels(
            config,
            |k| std::env::var(k).ok(),
            || gethostname::gethostname().into_string().ok(),
        )
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn read_marker(log_dir: &str, name: &str) -> Option<String> {
    non_empty(std::fs::read_to_string(Path::new(log_dir).join(name)).ok())
}

fn resolve_labels<E, H>(config: &Configuration, env: E, hostname: H) -> Labels
where
    E: Fn(&str) -> Option<String>,
    H: FnOnce() -> Option<String>,
{
    let scenario = non_empty(Some(config.scenario.clone()))
        .or_else(|| non_empty(env("SCENARIO")))
        .or_else(|| read_marker(&config.log_dir, ".scenario"));
    let container_name = non_empty(Some(config.container_name.clone()))
        .or_else(|| non_empty(env("CONTAINER_NAME")))
        .or_else(|| non_empty(env("HOSTNAME")))
        .or_else(|| read_marker(&config.log_dir, ".container_name"))
        .or_else(|| non_empty(hostname()));
    Labels {
        scenario,
        container_name,
    }
}

// PRETTY PRINT SUPPORT ///////////////////////////////////////////////////////////////////////////////////////

fn render_source(meta: Option<&Metadata>) -> String {
    meta.map_or_else(String::new, |m| {
        m.source
            .as_ref()
            .map_or_else(|| m.name.to_string(), figment::Source::to_string)
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(_tag, s) => format!("{s:?}"),
        Value::Char(_tag, c) => c.to_string(),
        Value::Bool(_tag, b) => b.to_string(),
        Value::Num(_tag, num) => num
            .to_i128()
            .map(|v| v.to_string())
            .or_else(|| num.to_u128().map(|v| v.to_string()))
            .or_else(|| num.to_f64().map(|v| v.to_string()))
            .unwrap_or_default(),
        Value::Empty(_tag, _) => "<empty>".into(),
        Value::Dict(_tag, dict) => format!("<{} entries>", dict.len()),
        Value::Array(_tag, vec) => format!(
            "[{}]",
            vec.iter().map(render_value).collect::<Vec<_>>().join(",")
        ),
    }
}

impl Display for Manager {
    /// One line per field: name, value, and where the value came from
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = match self.data.data() {
            Ok(d) => d,
            Err(e) => return write!(f, "error: {e}"),
        };
        let Some(data) = data.get(&figment::Profile::Default) else {
            return Ok(());
        };
        let width = data.keys().map(String::len).max().unwrap_or_default();
        for field in data.keys() {
            match self.data.find_value(field) {
                Ok(value) => writeln!(
                    f,
                    "{field:width$}  {:<24} {}",
                    render_value(&value),
                    render_source(self.data.find_metadata(field)),
                )?,
                Err(e) => writeln!(f, "error on field {field}: {e}")?,
            }
        }
        Ok(())
    }
}
