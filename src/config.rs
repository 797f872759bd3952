//! Configuration module for the frame-echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::protocol::{MAX_MESSAGE_SIZE, MESSAGE_SIZE_LIMIT};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "frame-echo")]
#[command(version = "0.1.0")]
#[command(about = "A poll-driven echo server for length-prefixed frames", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:1234)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum payload size of a single frame in bytes
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
        }
    }
}

/// Event loop tuning
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Readiness events collected per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Upper bound on a single poll wait, in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

/// Wire protocol limits
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum payload size of a single frame
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_listen() -> String {
    "127.0.0.1:1234".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_batch_size() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub backlog: i32,
    pub batch_size: usize,
    pub poll_timeout: Duration,
    pub max_message_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        // The built-in defaults always validate.
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1234)),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            batch_size: default_batch_size(),
            poll_timeout: Duration::from_millis(default_poll_timeout_ms()),
            max_message_size: default_max_message_size(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve configuration from already-parsed CLI args.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values, then validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|source| ConfigError::InvalidListen {
                value: listen.clone(),
                source,
            })?;

        let max_message_size = cli
            .max_message_size
            .unwrap_or(toml_config.protocol.max_message_size);
        if max_message_size > MESSAGE_SIZE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_message_size {max_message_size} exceeds limit {MESSAGE_SIZE_LIMIT}"
            )));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be at least 1".into()));
        }

        if toml_config.runtime.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }

        Ok(Config {
            listen,
            max_connections,
            backlog: toml_config.server.backlog,
            batch_size: toml_config.runtime.batch_size,
            poll_timeout: Duration::from_millis(toml_config.runtime.poll_timeout_ms),
            max_message_size,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid listen address '{value}': {source}")]
    InvalidListen {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:1234");
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.protocol.max_message_size, 1096);
        assert_eq!(config.runtime.poll_timeout_ms, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_merged_defaults_match_config_default() {
        let merged = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap();
        let default = Config::default();
        assert_eq!(merged.listen, default.listen);
        assert_eq!(merged.max_connections, default.max_connections);
        assert_eq!(merged.backlog, default.backlog);
        assert_eq!(merged.batch_size, default.batch_size);
        assert_eq!(merged.poll_timeout, default.poll_timeout);
        assert_eq!(merged.max_message_size, default.max_message_size);
        assert_eq!(merged.log_level, default.log_level);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:4000"
            max_connections = 16

            [runtime]
            poll_timeout_ms = 250

            [protocol]
            max_message_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:4000");
        assert_eq!(config.server.max_connections, 16);
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.runtime.poll_timeout_ms, 250);
        assert_eq!(config.runtime.batch_size, 1024);
        assert_eq!(config.protocol.max_message_size, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:4000"
            max_connections = 16

            [logging]
            level = "debug"
        "#,
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "frame-echo",
            "--listen",
            "127.0.0.1:5000",
            "--max-message-size",
            "64",
            "--log-level",
            "trace",
        ]);

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.max_message_size, 64);
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_invalid_listen_rejected() {
        let cli = CliArgs {
            listen: Some("not-an-address".into()),
            ..CliArgs::default()
        };
        let err = Config::merge(cli, TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen { .. }));
    }

    #[test]
    fn test_max_message_size_bounded() {
        let at_limit = CliArgs {
            max_message_size: Some(MESSAGE_SIZE_LIMIT),
            ..CliArgs::default()
        };
        let config = Config::merge(at_limit, TomlConfig::default()).unwrap();
        assert_eq!(config.max_message_size, MESSAGE_SIZE_LIMIT);

        let toml_config: TomlConfig =
            toml::from_str("[protocol]\nmax_message_size = 4294967295\n").unwrap();
        let err = Config::merge(CliArgs::default(), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let over = CliArgs {
            max_message_size: Some(MESSAGE_SIZE_LIMIT + 1),
            ..CliArgs::default()
        };
        let err = Config::merge(over, TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let toml_config: TomlConfig = toml::from_str("[runtime]\nbatch_size = 0\n").unwrap();
        let err = Config::merge(CliArgs::default(), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/frame-echo.toml")),
            ..CliArgs::default()
        };
        let err = Config::from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
