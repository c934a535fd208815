//! Configuration for the scheduler daemon.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`config/tempo.{yaml,toml,json}` or `--config`)
//! 3. Environment variables `TEMPO__SECTION__KEY` (a `.env` file is honoured)
//!
//! Command-line flags are applied on top by the binary.

pub mod error;

pub use error::{ConfigResult, ConfigurationError};

use serde::{Deserialize, Serialize};

/// Default config file, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/tempo";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TEMPO";

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load and validate configuration.
    pub fn load(config_file: Option<&str>) -> anyhow::Result<Self> {
        let config = Self::load_unchecked(config_file)?;
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;
        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked(config_file: Option<&str>) -> anyhow::Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to read .env file");
            }
        }
        Self::from_sources(
            config_file,
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    fn from_sources(
        config_file: Option<&str>,
        environment: config::Environment,
    ) -> anyhow::Result<Self> {
        let file = match config_file {
            Some(path) => config::File::with_name(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(environment)
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Check every section, collecting all problems.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.server.host.trim().is_empty() {
            errors.push(ConfigurationError::invalid(
                "server.host",
                "host is empty",
                "Set a bind address such as 127.0.0.1",
            ));
        }
        if self.database.path.trim().is_empty() {
            errors.push(ConfigurationError::invalid(
                "database.path",
                "path is empty",
                "Set a SQLite file path, or \":memory:\" for a throwaway store",
            ));
        }
        if self.scheduler.consumer_buffer == 0 {
            errors.push(ConfigurationError::invalid(
                "scheduler.consumer_buffer",
                "buffer must hold at least one event",
                "Use a value of 1 or more (default 64)",
            ));
        }
        if self.scheduler.stale_run_timeout_secs == Some(0) {
            errors.push(ConfigurationError::invalid(
                "scheduler.stale_run_timeout_secs",
                "a zero timeout would fail every running run",
                "Remove the setting to disable the reaper, or use a positive number of seconds",
            ));
        }
        if self.scheduler.reaper_interval_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "scheduler.reaper_interval_secs",
                "interval must be positive",
                "Use a value of 1 or more (default 300)",
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            errors.push(ConfigurationError::invalid(
                "logging.level",
                format!("'{}' is not a valid filter", self.logging.level),
                "Use trace, debug, info, warn, error or an EnvFilter directive",
            ));
        }

        match ConfigurationError::from_errors(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Schedule store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path; `":memory:"` selects the in-memory store.
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "data/tempo.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Scheduler runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Per-consumer trigger channel capacity.
    #[serde(default = "default_consumer_buffer")]
    pub consumer_buffer: usize,
    /// Fail `running` runs older than this. Unset disables the reaper.
    #[serde(default)]
    pub stale_run_timeout_secs: Option<u64>,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

fn default_consumer_buffer() -> usize {
    crate::events::DEFAULT_CONSUMER_BUFFER
}

fn default_reaper_interval() -> u64 {
    300
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            consumer_buffer: default_consumer_buffer(),
            stale_run_timeout_secs: None,
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.scheduler.stale_run_timeout_secs.is_none());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_sources(
            None,
            env(&[
                ("TEMPO__SERVER__PORT", "9100"),
                ("TEMPO__DATABASE__PATH", ":memory:"),
                ("TEMPO__SCHEDULER__STALE_RUN_TIMEOUT_SECS", "7200"),
                ("TEMPO__LOGGING__FORMAT", "json"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.scheduler.stale_run_timeout_secs, Some(7200));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.scheduler.consumer_buffer, 64);
    }

    #[test]
    fn test_config_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9200\n\n[scheduler]\nconsumer_buffer = 8\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config =
            AppConfig::from_sources(Some(&path), env(&[("TEMPO__SERVER__PORT", "9300")])).unwrap();
        assert_eq!(config.server.port, 9300);
        assert_eq!(config.scheduler.consumer_buffer, 8);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(AppConfig::from_sources(Some("/definitely/not/here"), env(&[])).is_err());
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = AppConfig::default();
        config.database.path = String::new();
        config.scheduler.consumer_buffer = 0;
        config.scheduler.stale_run_timeout_secs = Some(0);

        let err = config.validate().unwrap_err();
        assert_eq!(err.count(), 3);
        assert!(err.to_string().contains("database.path"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_environment() {
        // SAFETY: serialized with the other env-mutating tests.
        unsafe { std::env::set_var("TEMPO__SERVER__HOST", "0.0.0.0") };
        let config = AppConfig::load(None);
        // SAFETY: as above.
        unsafe { std::env::remove_var("TEMPO__SERVER__HOST") };

        assert_eq!(config.unwrap().server.host, "0.0.0.0");
    }
}
