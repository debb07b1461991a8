//! Processor configuration, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! processor listening on `127.0.0.1:8080`.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 9000
//! workers = 4
//! shutdown_grace_secs = 10
//! benchmark_delay_ms = 250
//! log_filter = "business_processor=debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::RequestDecoder;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    pub host: String,
    pub port: u16,
    /// Queue workers; defaults to the number of available CPUs.
    pub workers: Option<usize>,
    pub max_request_bytes: usize,
    pub shutdown_grace_secs: u64,
    pub benchmark_delay_ms: u64,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            workers: None,
            max_request_bytes: RequestDecoder::DEFAULT_MAX_REQUEST_BYTES,
            shutdown_grace_secs: 30,
            benchmark_delay_ms: 5000,
            log_filter: "business_processor=info".to_owned(),
        }
    }
}

impl ProcessorConfig {
    /// Reads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be greater than 0".into()));
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_request_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// `host:port`, as passed to the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn workers(&self) -> usize {
        self.workers
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn benchmark_delay(&self) -> Duration {
        Duration::from_millis(self.benchmark_delay_ms)
    }
}

impl std::str::FromStr for ProcessorConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
