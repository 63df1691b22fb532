//! Configuration loading for sync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`). Every
//! section is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for sync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Room lifecycle configuration.
    #[serde(default)]
    pub rooms: RoomsConfig,
    /// Connection heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP and WebSocket listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Largest accepted text frame in bytes (default: 16MB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Frames queued per connection before it is dropped as too slow
    /// (default: 256).
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Seconds without a join or relayed message before a room is deleted
    /// (default: 600 = 10 minutes).
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// How often idle rooms are swept in seconds (default: 30).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Connection heartbeat configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between WebSocket pings (default: 30). A connection that has
    /// not answered the previous ping is terminated.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024 // 16MB
}

fn default_outbox_capacity() -> usize {
    256
}

fn default_inactivity_timeout() -> u64 {
    10 * 60 // 10 minutes
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_frame_bytes: default_max_frame_bytes(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Per-connection queue size, at least one frame.
    pub fn outbox_capacity(&self) -> usize {
        self.outbox_capacity.max(1)
    }
}

impl RoomsConfig {
    /// Idle time after which a room is deleted.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Sweep period, at least one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl HeartbeatConfig {
    /// Ping period, at least one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.outbox_capacity(), 256);
        assert_eq!(config.rooms.inactivity_timeout(), Duration::from_secs(600));
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(30));
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(config.rooms.sweep_interval_secs, 30);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[rooms]
inactivity_timeout_secs = 120

[heartbeat]
interval_secs = 10

[http]
metrics_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.rooms.inactivity_timeout_secs, 120);
        assert_eq!(config.rooms.sweep_interval_secs, 30);
        assert_eq!(config.heartbeat.interval_secs, 10);
        assert!(!config.http.metrics_enabled);
    }

    #[test]
    fn sizes_and_intervals_have_a_floor() {
        let config: Config = toml::from_str(
            r#"
[server]
outbox_capacity = 0

[rooms]
sweep_interval_secs = 0

[heartbeat]
interval_secs = 0
"#,
        )
        .unwrap();
        assert_eq!(config.server.outbox_capacity(), 1);
        assert_eq!(config.rooms.sweep_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(1));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"127.0.0.1:9000\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("relay.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
