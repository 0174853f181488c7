use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::{ExecutionMode, WorkerId};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_retry_attempts: {0}. Must be at least 1")]
    InvalidMaxRetryAttempts(u32),

    #[error("Invalid retry_batch_limit: {0}. Must be at least 1")]
    InvalidRetryBatchLimit(usize),

    #[error("Invalid interval_ms for worker {0}: must be at least 1")]
    InvalidWorkerInterval(WorkerId),

    #[error("Lease TTL of worker {worker} ({ttl_ms}ms) must exceed its interval ({interval_ms}ms)")]
    LeaseTtlTooShort {
        worker: WorkerId,
        ttl_ms: u64,
        interval_ms: u64,
    },

    #[error("Adapter '{0}' uses an HTTP mode but has no base_url")]
    MissingBaseUrl(String),

    #[error("Adapter '{0}' uses sidecar mode but has no sidecar_command")]
    MissingSidecarCommand(String),

    #[error("Adapter '{0}' has requests_per_second = 0")]
    InvalidRateLimit(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .labexec/config.yaml (project config)
    /// 3. .labexec/local.yaml (project local overrides, optional)
    /// 4. Environment variables (LABEXEC_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new("."))
    }

    /// Same hierarchy as [`load`](Self::load), rooted at `root`.
    pub fn load_from(root: &Path) -> Result<Config> {
        let config_dir = root.join(".labexec");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(config_dir.join("config.yaml")))
            .merge(Yaml::file(config_dir.join("local.yaml")))
            .merge(Env::prefixed("LABEXEC_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.execution.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidMaxRetryAttempts(0));
        }
        if config.execution.retry_batch_limit == 0 {
            return Err(ConfigError::InvalidRetryBatchLimit(0));
        }

        for worker in WorkerId::ALL {
            let worker_config = config.workers.for_worker(worker);
            if worker_config.interval_ms == 0 {
                return Err(ConfigError::InvalidWorkerInterval(worker));
            }
            if let Some(ttl_ms) = worker_config.lease_ttl_ms {
                if ttl_ms <= worker_config.interval_ms {
                    return Err(ConfigError::LeaseTtlTooShort {
                        worker,
                        ttl_ms,
                        interval_ms: worker_config.interval_ms,
                    });
                }
            }
        }

        for (adapter_id, adapter) in &config.adapters {
            if adapter.requests_per_second == Some(0) {
                return Err(ConfigError::InvalidRateLimit(adapter_id.clone()));
            }
            if adapter.timeout_ms == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "adapter '{adapter_id}' timeout_ms cannot be 0"
                )));
            }
            // A simulated adapter never reaches its bridge.
            if adapter.simulate {
                continue;
            }
            match adapter.mode {
                ExecutionMode::DirectHttp | ExecutionMode::TwoStepHttp
                    if adapter.base_url.as_deref().map_or(true, str::is_empty) =>
                {
                    return Err(ConfigError::MissingBaseUrl(adapter_id.clone()));
                }
                ExecutionMode::Sidecar if adapter.sidecar_command.as_deref().map_or(true, str::is_empty) => {
                    return Err(ConfigError::MissingSidecarCommand(adapter_id.clone()));
                }
                _ => {}
            }
        }

        if config.executor.executor_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("executor.executor_id cannot be empty".to_string()));
        }
        if config.executor.max_tasks == 0 {
            return Err(ConfigError::ValidationFailed("executor.max_tasks must be at least 1".to_string()));
        }

        Ok(())
    }
}
