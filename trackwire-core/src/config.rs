//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/trackwire/config.toml`, or
//! constructed directly by the host application at its composition root and
//! handed to [`crate::pipeline::Pipeline::new`]. There is no global instance.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/trackwire/` (~/.config/trackwire/)
//! - Data: `$XDG_DATA_HOME/trackwire/` (~/.local/share/trackwire/)
//! - State/Logs: `$XDG_STATE_HOME/trackwire/` (~/.local/state/trackwire/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Durable queue configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Transport/endpoint configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Durable queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum queued events before oldest-first eviction
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Events handed to the transport per flush cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between periodic flush ticks
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Failed delivery attempts before an event is dropped
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            max_retry_count: default_max_retry_count(),
        }
    }
}

impl PipelineConfig {
    /// Periodic flush interval as a [`Duration`]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            return Err(Error::Config(
                "pipeline.max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 || self.batch_size > 50 {
            return Err(Error::Config(
                "pipeline.batch_size must be between 1 and 50".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::Config(
                "pipeline.flush_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_max_queue_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    20
}

fn default_flush_interval() -> u64 {
    30
}

fn default_max_retry_count() -> u32 {
    3
}

/// Transport/endpoint configuration
///
/// Identifies the collection endpoint and the credentials sent with every
/// request. The API key travels in the `X-Api-Key` header; the workspace id
/// is additionally sent as a bearer credential for backward compatibility.
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Collection endpoint URL (e.g., `https://in.trackwire.dev`)
    pub endpoint_url: Option<String>,

    /// Static API key
    pub api_key: Option<String>,

    /// Workspace identifier
    pub workspace_id: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,

    /// Additional in-call retry attempts for transient failures
    #[serde(default = "default_transport_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            api_key: None,
            workspace_id: None,
            timeout_secs: default_transport_timeout(),
            max_retries: default_transport_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
        }
    }
}

impl TransportConfig {
    /// Check if the transport has everything it needs to send
    pub fn is_ready(&self) -> bool {
        self.endpoint_url.is_some() && self.api_key.is_some() && self.workspace_id.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_url.is_none() {
            return Err(Error::Config(
                "transport.endpoint_url is required".to_string(),
            ));
        }
        if self.api_key.is_none() {
            return Err(Error::Config("transport.api_key is required".to_string()));
        }
        if self.workspace_id.is_none() {
            return Err(Error::Config(
                "transport.workspace_id is required".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "transport.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// HTTP request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base backoff delay as a [`Duration`]
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }
}

fn default_transport_timeout() -> u64 {
    30
}

fn default_transport_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    500
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
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

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the parts the pipeline depends on
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.transport.validate()?;
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/trackwire/config.toml` (~/.config/trackwire/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("trackwire").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    ///
    /// `$XDG_DATA_HOME/trackwire/` (~/.local/share/trackwire/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("trackwire")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/trackwire/` (~/.local/state/trackwire/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("trackwire")
    }

    /// Returns the store file path
    ///
    /// `$XDG_DATA_HOME/trackwire/store.db` (~/.local/share/trackwire/store.db)
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/trackwire/trackwire.log` (~/.local/state/trackwire/trackwire.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("trackwire.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.max_queue_size, 1000);
        assert_eq!(config.pipeline.batch_size, 20);
        assert_eq!(config.pipeline.flush_interval_secs, 30);
        assert_eq!(config.pipeline.max_retry_count, 3);
        assert_eq!(config.transport.timeout_secs, 30);
        assert_eq!(config.transport.max_retries, 3);
        assert_eq!(config.transport.base_retry_delay_ms, 500);
        assert!(!config.transport.is_ready());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[pipeline]
max_queue_size = 5
batch_size = 10
flush_interval_secs = 60

[transport]
endpoint_url = "https://in.trackwire.example.com"
api_key = "tw_live_xxxxxxxxxxxx"
workspace_id = "ws_42"

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.pipeline.max_queue_size, 5);
        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.flush_interval_secs, 60);
        assert_eq!(
            config.transport.endpoint_url.as_deref(),
            Some("https://in.trackwire.example.com")
        );
        assert!(config.transport.is_ready());
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_validation() {
        // Missing credentials should fail
        let config = TransportConfig::default();
        assert!(config.validate().is_err());

        let config = TransportConfig {
            endpoint_url: Some("https://in.trackwire.example.com".to_string()),
            api_key: Some("tw_live_test".to_string()),
            workspace_id: Some("ws_1".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.is_ready());
    }

    #[test]
    fn test_pipeline_validation() {
        let config = PipelineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            batch_size: 51,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            max_queue_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(PipelineConfig::default().validate().is_ok());
    }
}
