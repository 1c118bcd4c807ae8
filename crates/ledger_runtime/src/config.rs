//! Layered runtime configuration
//!
//! Sources are applied in order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. An optional `ledger.toml` (or the file passed to [`LedgerConfig::load_from`])
//! 3. Environment variables prefixed `LEDGER_`, with `__` between nested keys,
//!    e.g. `LEDGER_DATABASE__URL` or `LEDGER_LEDGER__AUTO_OFFSET_REVERSE_LOANS`
//!
//! A `.env` file is read into the environment first when present.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use core_kernel::{CoreError, LedgerSettings};
use infra_db::DatabaseConfig;

const DEFAULT_CONFIG_FILE: &str = "ledger";
const ENV_PREFIX: &str = "LEDGER";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] CoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/household_ledger".to_string(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl DatabaseSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.url.trim().is_empty() {
            return Err(CoreError::configuration("database.url must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(CoreError::configuration(
                "database.max_connections must be greater than zero",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(CoreError::configuration(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }

    /// Pool settings for the PostgreSQL store
    pub fn pool_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.url.clone())
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Everything the runtime needs to start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl LedgerConfig {
    /// Loads from `.env`, an optional `ledger.toml` in the working directory
    /// and the environment
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Loads with `path` as the optional file source
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true);
        Self::build(
            config::Config::builder()
                .add_source(config::File::with_name(path).required(false))
                .add_source(environment),
        )
    }

    /// Parses a TOML document on top of the defaults, ignoring the environment
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::build(
            config::Config::builder()
                .add_source(config::File::from_str(toml, config::FileFormat::Toml)),
        )
    }

    fn build(
        sources: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(sources.build()?)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.database.validate()?;
        self.ledger.validate()
    }
}
