use crate::logging::LogFormat;
use anyhow::Context;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the light client.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Deadline for a single source request, in milliseconds.
    pub request_timeout_ms: u64,
    /// How long to wait for the chain to reach a requested height, in milliseconds.
    pub wait_timeout_ms: u64,
    /// Delay between status polls while waiting for a height, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound on nested bisection steps for one certification.
    pub max_bisection_depth: usize,
    /// Validator sets and commits kept by the caching source.
    pub cache_capacity: usize,
    /// Where trusted checkpoints are persisted. In-memory only when unset.
    pub trust_log: Option<PathBuf>,
    /// The format for logging.
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            wait_timeout_ms: 30_000,
            poll_interval_ms: 500,
            max_bisection_depth: 64,
            cache_capacity: 1024,
            trust_log: None,
            log_format: LogFormat::Minimal,
        }
    }
}

impl ClientConfig {
    /// Defaults, then an optional config file, then `COINLIGHT_*` environment variables.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        Self::build(file, Environment::with_prefix("COINLIGHT").try_parsing(true)).with_context(
            || match file {
                Some(path) => format!("loading client config from {}", path.display()),
                None => "loading client config from environment".to_string(),
            },
        )
    }

    fn build(file: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("request_timeout_ms", defaults.request_timeout_ms)?
            .set_default("wait_timeout_ms", defaults.wait_timeout_ms)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms)?
            .set_default("max_bisection_depth", defaults.max_bisection_depth as u64)?
            .set_default("cache_capacity", defaults.cache_capacity as u64)?
            .set_default("log_format", "Minimal")?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }
        builder.add_source(env).build()?.try_deserialize()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
