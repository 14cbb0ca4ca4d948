//! # rb-config
//!
//! Layered settings for the storage engine:
//! serde defaults → optional TOML file → `DATABASE_URL` → `RB_*` environment.
//!
//! Environment keys use `__` between nesting levels, e.g.
//! `RB_DATABASE__URL`, `RB_BOARD__BUMP_LIMIT`, `RB_CACHE__REFRESH_INTERVAL_SECS`.

use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Default location of the optional settings file, relative to the working dir.
pub const DEFAULT_CONFIG_PATH: &str = "config/default";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    #[serde(default)]
    pub board: BoardSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(deserialize_with = "deserialize_secret")]
    pub url: SecretString,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Knobs that shape threads and pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Messages that still bump a thread, opener included.
    pub bump_limit: i32,
    /// Most recent messages per thread kept in the preview cache.
    pub n_last_msg: i32,
    pub threads_per_page: i64,
    pub messages_per_page: i64,
    /// Threads with at most this many messages are served in one page.
    pub single_page_threshold: i32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            bump_limit: 500,
            n_last_msg: 3,
            threads_per_page: 10,
            messages_per_page: 100,
            single_page_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub refresh_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

fn default_operation_timeout_secs() -> u64 {
    5
}

fn default_max_connections() -> u32 {
    10
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl Settings {
    /// Loads `.env`, then the file named by `RB_CONFIG` (or [`DEFAULT_CONFIG_PATH`]).
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let path = std::env::var("RB_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_default("database.url", url)?;
        }
        let builder = builder
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("RB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: i64) -> Result<(), ConfigError> {
            if value < 1 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("must be at least 1, got {}", value),
                });
            }
            Ok(())
        }

        positive("database.max_connections", i64::from(self.database.max_connections))?;
        positive("board.bump_limit", i64::from(self.board.bump_limit))?;
        positive("board.n_last_msg", i64::from(self.board.n_last_msg))?;
        positive("board.threads_per_page", self.board.threads_per_page)?;
        positive("board.messages_per_page", self.board.messages_per_page)?;
        positive("board.single_page_threshold", i64::from(self.board.single_page_threshold))?;
        positive("cache.refresh_interval_secs", self.cache.refresh_interval_secs as i64)?;
        positive("operation_timeout_secs", self.operation_timeout_secs as i64)?;
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl CacheSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
