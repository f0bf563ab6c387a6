//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod ledger;
mod storage;
mod sweeper;

pub use ledger::{
    LedgerPolicy, DEFAULT_MAX_AMOUNT, DEFAULT_MAX_DESCRIPTION_LEN, DEFAULT_MAX_EXPIRATION_DAYS,
    DEFAULT_MAX_PAGE_SIZE,
};
pub use storage::{StorageConfig, StorageType};
pub use sweeper::{LeaseMode, SweeperConfig};

use crate::ledger::validate::limits::MAX_DAYS;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "pointledger.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "POINTLEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "POINTLEDGER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "POINTLEDGER_LOG";

use rust_decimal::Decimal;
use serde::Deserialize;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Limits applied to ledger requests.
    pub ledger: LedgerPolicy,
    /// Expiration sweeper configuration.
    pub sweeper: SweeperConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `pointledger.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing: in-memory storage, scheduler off.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::memory(),
            sweeper: SweeperConfig {
                enabled: false,
                ..SweeperConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject values the ledger cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.storage_type == StorageType::Sqlite {
            if self.storage.path.trim().is_empty() {
                return Err(ConfigError::invalid("storage.path", "must not be empty"));
            }
            if self.storage.max_connections == 0 {
                return Err(ConfigError::invalid(
                    "storage.max_connections",
                    "must be at least 1",
                ));
            }
        }

        let policy = &self.ledger;
        if policy.max_amount <= Decimal::ZERO {
            return Err(ConfigError::invalid("ledger.max_amount", "must be positive"));
        }
        if policy.max_description_len == 0 {
            return Err(ConfigError::invalid(
                "ledger.max_description_len",
                "must be at least 1",
            ));
        }
        if policy.max_expiration_days == 0 || policy.max_expiration_days > MAX_DAYS {
            return Err(ConfigError::invalid(
                "ledger.max_expiration_days",
                format!("must be in 1..={MAX_DAYS}"),
            ));
        }
        if let Some(days) = policy.default_expiration_days {
            if days == 0 || days > policy.max_expiration_days {
                return Err(ConfigError::invalid(
                    "ledger.default_expiration_days",
                    format!("must be in 1..={}", policy.max_expiration_days),
                ));
            }
        }
        if policy.max_page_size == 0 {
            return Err(ConfigError::invalid("ledger.max_page_size", "must be at least 1"));
        }

        let sweeper = &self.sweeper;
        if sweeper.member_concurrency == 0 {
            return Err(ConfigError::invalid(
                "sweeper.member_concurrency",
                "must be at least 1",
            ));
        }
        if sweeper.member_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "sweeper.member_timeout_ms",
                "must be positive",
            ));
        }
        if sweeper.report_horizon_days == 0 || sweeper.report_horizon_days > MAX_DAYS {
            return Err(ConfigError::invalid(
                "sweeper.report_horizon_days",
                format!("must be in 1..={MAX_DAYS}"),
            ));
        }
        if sweeper.enabled {
            if sweeper.sweep_interval_secs == 0 {
                return Err(ConfigError::invalid(
                    "sweeper.sweep_interval_secs",
                    "must be positive",
                ));
            }
            if sweeper.report_interval_secs == 0 {
                return Err(ConfigError::invalid(
                    "sweeper.report_interval_secs",
                    "must be positive",
                ));
            }
        }
        if sweeper.lease == LeaseMode::Store && sweeper.lease_ttl() <= sweeper.member_timeout() {
            return Err(ConfigError::invalid(
                "sweeper.lease_ttl_secs",
                format!(
                    "must outlast sweeper.member_timeout_ms ({}ms)",
                    sweeper.member_timeout_ms
                ),
            ));
        }
        Ok(())
    }
}
