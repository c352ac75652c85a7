//! Tracing subscriber setup

use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::{CliError, Result};

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Filter from `--log-level` when given, else `RUST_LOG`, else `info`
fn filter(level: Option<&str>) -> Result<EnvFilter> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    };
    filter.map_err(|e| CliError::config_with_help(e.to_string(), "use a level such as info or xpkg_kube=debug"))
}

/// Install the global subscriber. Logs go to stderr so command output stays parseable.
pub fn init(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Plain => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| CliError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_level_overrides_environment() {
        assert!(filter(Some("xpkg_kube=debug,warn")).is_ok());
    }

    #[test]
    fn test_invalid_level_is_a_config_error() {
        let err = filter(Some("xpkg_kube=loud")).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }
}
