//! Initialize device identity.

use anyhow::Result;
use std::path::Path;
use sync_types::{DeviceClass, VectorSpace};

use crate::config::{DeviceConfig, DEVICE_FILE};

/// Run the init command.
pub async fn run(
    data_dir: &Path,
    name: &str,
    device_class: DeviceClass,
    vector_space: VectorSpace,
) -> Result<()> {
    // Check if already initialized
    if DeviceConfig::exists(data_dir).await {
        anyhow::bail!(
            "Device already initialized. Delete {} to reinitialize.",
            data_dir.join(DEVICE_FILE).display()
        );
    }

    let config = DeviceConfig::new(name, device_class, vector_space);
    config.save(data_dir).await?;

    println!("Device initialized successfully!");
    println!();
    println!("  Device ID: {}", config.device_id);
    println!("  Name:      {}", config.device_name);
    println!(
        "  Vectors:   {} ({} dims, {})",
        config.vector_space.model, config.vector_space.dimension, config.vector_space.backend
    );
    println!("  Data dir:  {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. Start a session: sync-cli pair --create");
    println!("  2. Or answer one:   sync-cli pair --join <payload>");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn space() -> VectorSpace {
        VectorSpace::new("all-MiniLM-L6-v2", 384, "onnx")
    }

    #[tokio::test]
    async fn init_creates_device_config() {
        let dir = tempdir().unwrap();
        run(dir.path(), "Test Device", DeviceClass::Desktop, space())
            .await
            .unwrap();

        assert!(dir.path().join(DEVICE_FILE).exists());

        let config = DeviceConfig::load(dir.path()).await.unwrap();
        assert_eq!(config.device_name, "Test Device");
        assert!(!config.device_id.as_str().is_empty());
    }

    #[tokio::test]
    async fn init_fails_if_already_initialized() {
        let dir = tempdir().unwrap();

        // First init should succeed
        run(dir.path(), "Device 1", DeviceClass::Desktop, space())
            .await
            .unwrap();

        // Second init should fail
        let result = run(dir.path(), "Device 2", DeviceClass::Mobile, space()).await;
        assert!(result.is_err());
    }
}
