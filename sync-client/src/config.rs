//! Configuration for the sync client.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_core::ReconnectPolicy;

/// Sync client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Relay WebSocket URL (default: ws://127.0.0.1:8080/ws).
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    /// Digests per batch (default: 50).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Most recent digests sent per session (default: 1000).
    #[serde(default = "default_max_digests")]
    pub max_digests: usize,
    /// Pause between outgoing batches in milliseconds (default: 100).
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Relay ping interval in seconds (default: 25).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Pairing payload lifetime in seconds (default: 300).
    #[serde(default = "default_pairing_ttl_secs")]
    pub pairing_ttl_secs: u64,
    /// First reconnect delay in milliseconds (default: 1000).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap in milliseconds (default: 16000).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up (default: 5).
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
}

// Default value functions
fn default_relay_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_max_digests() -> usize {
    1000
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_heartbeat_interval_secs() -> u64 {
    25
}

fn default_pairing_ttl_secs() -> u64 {
    5 * 60
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    16_000
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            page_size: default_page_size(),
            max_digests: default_max_digests(),
            batch_delay_ms: default_batch_delay_ms(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            pairing_ttl_secs: default_pairing_ttl_secs(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for `relay_url` with default settings.
    pub fn new(relay_url: &str) -> Self {
        Self {
            relay_url: relay_url.to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or holds values
    /// rejected by [`SyncConfig::validate`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - `page_size` is zero
    /// - `max_digests` is zero
    /// - `relay_url` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.max_digests == 0 {
            return Err(ConfigError::InvalidValue(
                "max_digests must be at least 1".to_string(),
            ));
        }
        if self.relay_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "relay_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the digests per batch.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the number of digests offered per session.
    pub fn with_max_digests(mut self, max_digests: usize) -> Self {
        self.max_digests = max_digests;
        self
    }

    /// Set the pause between outgoing batches.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the relay ping interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_secs = interval.as_secs();
        self
    }

    /// Set the pairing payload lifetime.
    pub fn with_pairing_ttl(mut self, ttl: Duration) -> Self {
        self.pairing_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the reconnect schedule.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_base_delay_ms = policy.base_delay.as_millis() as u64;
        self.reconnect_max_delay_ms = policy.max_delay.as_millis() as u64;
        self.reconnect_max_attempts = policy.max_attempts;
        self
    }

    /// Pause between outgoing batches.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// Relay ping interval (at least one second).
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Pairing payload lifetime.
    pub fn pairing_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing_ttl_secs)
    }

    /// Reconnect schedule.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A setting holds a value the engine cannot work with.
    #[error("invalid config: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.max_digests, 1000);
        assert_eq!(config.batch_delay(), Duration::from_millis(100));
        assert_eq!(config.pairing_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn default_reconnect_policy_matches_core() {
        assert_eq!(
            SyncConfig::default().reconnect_policy(),
            ReconnectPolicy::default()
        );
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
relay_url = "wss://relay.example.com/ws"
page_size = 100
batch_delay_ms = 0
reconnect_max_attempts = 3
"#;

        let config: SyncConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.relay_url, "wss://relay.example.com/ws");
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_delay(), Duration::ZERO);
        assert_eq!(config.reconnect_policy().max_attempts, 3);
        assert_eq!(config.max_digests, 1000);
    }

    #[test]
    fn builders_override_fields() {
        let config = SyncConfig::new("ws://localhost:9000/ws")
            .with_page_size(10)
            .with_max_digests(20)
            .with_batch_delay(Duration::from_millis(5))
            .with_heartbeat_interval(Duration::from_secs(60))
            .with_pairing_ttl(Duration::from_secs(30));

        assert_eq!(config.relay_url, "ws://localhost:9000/ws");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.max_digests, 20);
        assert_eq!(config.batch_delay_ms, 5);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(60));
        assert_eq!(config.pairing_ttl_secs, 30);
    }

    #[test]
    fn heartbeat_interval_has_a_floor() {
        let config = SyncConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_size = 25").unwrap();

        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.page_size, 25);
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = SyncConfig::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn from_file_invalid_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "page_size = \"many\"").unwrap();

        let result = SyncConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn default_config_passes_validation() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = SyncConfig::default()
            .with_page_size(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn zero_max_digests_is_rejected() {
        let err = SyncConfig::default()
            .with_max_digests(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("max_digests"));
    }

    #[test]
    fn empty_relay_url_is_rejected() {
        assert!(matches!(
            SyncConfig::new("  ").validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn from_file_rejects_zero_sizes() {
        for line in ["page_size = 0", "max_digests = 0"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "{}", line).unwrap();

            let result = SyncConfig::from_file(file.path());
            assert!(
                matches!(result, Err(ConfigError::InvalidValue(_))),
                "{} was accepted",
                line
            );
        }
    }
}
