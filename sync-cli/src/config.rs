//! Configuration management for sync-cli.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use sync_client::SyncConfig;
use sync_types::{now_millis, DeviceClass, DeviceId, DeviceInfo, VectorSpace};

/// Device identity file inside the data directory.
pub const DEVICE_FILE: &str = "device.json";

/// Optional client settings file inside the data directory.
pub const SYNC_CONFIG_FILE: &str = "sync.toml";

/// Device configuration stored locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier.
    pub device_id: DeviceId,
    /// Human-readable device name.
    pub device_name: String,
    /// Device form factor.
    pub device_class: DeviceClass,
    /// Operating system.
    pub platform: String,
    /// Embedding space this device's vectors are produced in.
    pub vector_space: VectorSpace,
    /// When the device was initialized (Unix ms).
    pub created_at: u64,
}

impl DeviceConfig {
    /// Create a new device configuration with a random id.
    pub fn new(name: &str, device_class: DeviceClass, vector_space: VectorSpace) -> Self {
        Self {
            device_id: DeviceId::random(),
            device_name: name.to_string(),
            device_class,
            platform: std::env::consts::OS.to_string(),
            vector_space,
            created_at: now_millis(),
        }
    }

    /// The description exchanged with peers.
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.device_id.clone(),
            name: self.device_name.clone(),
            device_class: self.device_class,
            platform: self.platform.clone(),
            agent: "sync-cli".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            vector_space: self.vector_space.clone(),
            last_seen: now_millis(),
            paired_at: None,
        }
    }

    /// Load device configuration from a directory.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(DEVICE_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .context("Device not initialized. Run 'sync-cli init' first.")?;
        serde_json::from_str(&contents).context("Invalid device configuration")
    }

    /// Save device configuration to a directory.
    pub async fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(DEVICE_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save device configuration")?;
        set_file_permissions_0600(&path).await?;
        Ok(())
    }

    /// Check if device is initialized.
    pub async fn exists(data_dir: &Path) -> bool {
        tokio::fs::try_exists(data_dir.join(DEVICE_FILE))
            .await
            .unwrap_or(false)
    }
}

/// Resolve client settings.
///
/// An explicit `--config` file must exist. Otherwise `sync.toml` in the data
/// directory is used when present, then the built-in defaults. `--relay`
/// overrides the relay URL from any source.
pub fn load_sync_config(
    data_dir: &Path,
    explicit: Option<&Path>,
    relay: Option<&str>,
) -> Result<SyncConfig> {
    let mut config = match explicit {
        Some(path) => SyncConfig::from_file(path)?,
        None => {
            let default_path = data_dir.join(SYNC_CONFIG_FILE);
            if default_path.exists() {
                SyncConfig::from_file(&default_path)?
            } else {
                SyncConfig::default()
            }
        }
    };
    if let Some(url) = relay {
        config.relay_url = url.to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
