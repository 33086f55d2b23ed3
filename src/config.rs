use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub const ENV_MIN_DELAY_MS: &str = "CELLFLOW_MIN_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "CELLFLOW_MAX_DELAY_MS";
pub const ENV_IDLE_THRESHOLD: &str = "CELLFLOW_IDLE_THRESHOLD";
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "CELLFLOW_DEFAULT_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "CELLFLOW_LOG_LEVEL";
pub const ENV_LOG_FILE: &str = "CELLFLOW_LOG_FILE";
pub const ENV_LOG_JSON: &str = "CELLFLOW_LOG_JSON";

/// Scheduler pacing and logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Delay between ticks while there is work.
    pub min_delay_ms: u64,
    /// Delay between ticks once the runtime has gone quiet.
    pub max_delay_ms: u64,
    /// Consecutive idle ticks before switching to the slow delay.
    pub idle_threshold: u32,
    /// Used by requests made with a zero timeout.
    pub default_timeout_ms: u64,
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub log_level: String,
    /// Daily rolling log file. Console only when unset.
    pub log_file: Option<PathBuf>,
    pub log_json: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1,
            max_delay_ms: 50,
            idle_threshold: 100,
            default_timeout_ms: 1000,
            log_level: "info".to_string(),
            log_file: None,
            log_json: false,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `CELLFLOW_*` variables. `env_file`, when it
    /// exists, is loaded into the environment first.
    pub fn from_env(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => info!("Loaded .env from {}", path.display()),
                    Err(err) => error!("could not load .env from {}: {err}", path.display()),
                }
            } else {
                warn!("no .env at {}, using the process environment", path.display());
            }
        }

        let mut config = Self::default();
        if let Some(v) = env_value(ENV_MIN_DELAY_MS) {
            config.min_delay_ms = v;
        }
        if let Some(v) = env_value(ENV_MAX_DELAY_MS) {
            config.max_delay_ms = v;
        }
        if let Some(v) = env_value(ENV_IDLE_THRESHOLD) {
            config.idle_threshold = v;
        }
        if let Some(v) = env_value(ENV_DEFAULT_TIMEOUT_MS) {
            config.default_timeout_ms = v;
        }
        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.log_level = level;
        }
        if let Ok(file) = env::var(ENV_LOG_FILE) {
            config.log_file = (!file.trim().is_empty()).then(|| PathBuf::from(file));
        }
        if let Some(v) = env_value(ENV_LOG_JSON) {
            config.log_json = v;
        }
        config.normalized()
    }

    /// Keeps the delays ordered and the default timeout non-zero.
    pub fn normalized(mut self) -> Self {
        if self.max_delay_ms < self.min_delay_ms {
            warn!(
                "max delay {}ms below min delay {}ms, using the min for both",
                self.max_delay_ms, self.min_delay_ms
            );
            self.max_delay_ms = self.min_delay_ms;
        }
        if self.default_timeout_ms == 0 {
            warn!("default timeout of 0ms, using 1000ms");
            self.default_timeout_ms = 1000;
        }
        self
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}={raw}: not a valid value");
            None
        }
    }
}
