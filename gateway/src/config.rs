//! Configuration for the gateway.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use ::config::{Config as ConfigLoader, Environment, File};
use batchgate_executor::ExecutorConfig;
use serde::Deserialize;

use crate::batching::BatchPolicy;
use crate::processor::ProcessorConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Served models by name.
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// One served model.
///
/// ```toml
/// [models.resnet_model]
/// max_batch_size = 32
/// preferred_batch_sizes = [8, 16]
/// max_queue_delay_us = 5000
/// instance_count = 2
/// processor = { kind = "label_decoder", labels_path = "imagenet_labels.json" }
/// executor = { kind = "remote", base_url = "http://localhost:8001" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub preferred_batch_sizes: Vec<usize>,
    #[serde(default = "default_max_queue_delay_us")]
    pub max_queue_delay_us: u64,
    /// Batches allowed in flight at once.
    #[serde(default = "default_instance_count")]
    pub instance_count: usize,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub executor: ExecutorConfig,
}

impl ModelConfig {
    /// Batching policy for this model.
    pub fn policy(&self, model: &str) -> Result<BatchPolicy, ConfigError> {
        BatchPolicy::new(
            self.max_batch_size,
            self.preferred_batch_sizes.clone(),
            Duration::from_micros(self.max_queue_delay_us),
        )
        .map_err(|e| ConfigError::Invalid {
            model: model.to_string(),
            reason: e.to_string(),
        })
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_batch_size() -> usize {
    8
}
fn default_max_queue_delay_us() -> u64 {
    1_000
}
fn default_instance_count() -> usize {
    1
}

/// Keys whose environment values are comma-separated lists.
const LIST_KEY_SUFFIX: &str = ".preferred_batch_sizes";

/// Environment variables in BATCHGATE__SECTION__KEY format.
///
/// Only `models.<name>.preferred_batch_sizes` is split on commas.
fn env_source(env: ::config::Map<String, String>) -> Environment {
    let list_keys: Vec<String> = env
        .keys()
        .filter_map(|name| {
            let key = name
                .to_lowercase()
                .strip_prefix("batchgate__")?
                .replace("__", ".");
            (key.starts_with("models.") && key.ends_with(LIST_KEY_SUFFIX)).then_some(key)
        })
        .collect();

    let mut source = Environment::with_prefix("BATCHGATE")
        .separator("__")
        .try_parsing(true)
        .source(Some(env));
    if !list_keys.is_empty() {
        source = source.list_separator(",");
        for key in &list_keys {
            source = source.with_list_parse_key(key);
        }
    }
    source
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid configuration for model '{model}': {reason}")]
    Invalid { model: String, reason: String },
    #[error("Failed to read labels from {path}: {reason}")]
    Labels { path: String, reason: String },
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (BATCHGATE__SECTION__KEY format)
    /// 2. batchgate.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            ConfigLoader::builder().add_source(File::with_name("batchgate").required(false)),
            std::env::vars().collect(),
        )
    }

    /// Load configuration from an explicit file, still honouring environment
    /// overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::from_builder(
            ConfigLoader::builder().add_source(File::from(path)),
            std::env::vars().collect(),
        )
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
        env: ::config::Map<String, String>,
    ) -> Result<Self, ConfigError> {
        let config: Config = builder
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(env_source(env))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every model's batching settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, model) in &self.models {
            model.policy(name)?;
            if model.instance_count == 0 {
                return Err(ConfigError::Invalid {
                    model: name.clone(),
                    reason: "instance_count must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }
}
