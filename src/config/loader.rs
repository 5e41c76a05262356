//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate.
//! Sources are layered lowest to highest: built-in defaults, an optional TOML
//! file, then environment variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::WorkerConfig;
use crate::constants::{CONFIG_ENV_PREFIX, CONFIG_PATH_ENV};
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_CONFIG_FILE: &str = "config/worker.toml";

/// Loaded worker configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: WorkerConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    ///
    /// `TASKWEAVE_CONFIG_PATH` names a required file; without it `config/worker.toml`
    /// is used when present.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => {
                Self::load_from_sources(Some(Path::new(&path)), true, CONFIG_ENV_PREFIX)
            }
            _ => Self::load_from_sources(
                Some(Path::new(DEFAULT_CONFIG_FILE)),
                false,
                CONFIG_ENV_PREFIX,
            ),
        }
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from_file(path: &Path) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_sources(Some(path), true, CONFIG_ENV_PREFIX)
    }

    /// Load configuration from the given sources
    ///
    /// `env_prefix` is exposed so tests can isolate themselves from the process environment.
    pub fn load_from_sources(
        config_file: Option<&Path>,
        file_required: bool,
        env_prefix: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();

        if let Some(path) = config_file {
            if file_required && !path.is_file() {
                return Err(ConfigurationError::config_file_not_found(path));
            }
        }

        debug!(
            environment = %environment,
            config_file = ?config_file.map(|p| p.display().to_string()),
            env_prefix = %env_prefix,
            "Loading worker configuration"
        );

        let mut builder = Config::builder().add_source(Config::try_from(&WorkerConfig::default())?);
        if let Some(path) = config_file {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(file_required),
            );
        }
        builder = builder.add_source(Environment::with_prefix(env_prefix).try_parsing(true));

        let config: WorkerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&Self::sanitize_config_for_logging(&config))
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            exec_threads = config.exec_threads,
            full_policy = %config.full_policy,
            develop_mode = config.develop_mode,
            host = %config.host,
            "Worker configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_file: config_file
                .filter(|path| path.is_file())
                .map(Path::to_path_buf),
        }))
    }

    /// Wrap an already-built configuration (embedding applications, tests)
    pub fn from_config(config: WorkerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: None,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// File the configuration was read from, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Sanitized configuration for debugging output
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect environment from environment variables
    pub fn detect_environment() -> String {
        env::var("TASKWEAVE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    /// Mask values of sensitive-looking keys before logging
    fn sanitize_config_for_logging(config: &WorkerConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
