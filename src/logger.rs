use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::debug;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::config::RuntimeConfig;

/// Installs the global subscriber: an `EnvFilter`, a console layer on
/// stderr and, when configured, a daily rolling log file.
///
/// Calling it again once a subscriber is installed is a no-op.
pub fn init_tracing(config: &RuntimeConfig) -> Result<()> {
    // 1) RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;

    // 2) Console
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    // 3) Optional rolling file, plain text or newline-delimited JSON
    let file = match &config.log_file {
        Some(path) => Some(file_layer(path, config.log_json)?),
        None => None,
    };

    // 4) Install subscriber
    if let Err(err) = Registry::default()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()
    {
        debug!("tracing already initialised: {err}");
    }
    Ok(())
}

fn file_layer<S>(path: &Path, json: bool) -> Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file `{}` has no file name", path.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("cannot open log file in {}", dir.display()))?;

    let layer = fmt::layer().with_writer(appender).with_ansi(false);
    Ok(if json {
        layer.json().boxed()
    } else {
        layer.boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_layer_rejects_bare_directory() {
        let result = file_layer::<Registry>(Path::new("/"), false);
        assert!(result.is_err());
    }

    #[test]
    fn test_file_layer_creates_appender() {
        let dir = tempdir().unwrap();
        let layer = file_layer::<Registry>(&dir.path().join("cellflow.log"), true);
        assert!(layer.is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = RuntimeConfig {
            log_level: "warn".into(),
            ..RuntimeConfig::default()
        };
        init_tracing(&config).unwrap();
        init_tracing(&config).unwrap();
    }
}
