//! Show device and sync status.

use anyhow::Result;
use std::path::Path;
use sync_client::SyncConfig;
use sync_types::now_millis;

use crate::config::DeviceConfig;
use crate::store::JsonDigestStore;

/// Run the status command.
pub async fn run(data_dir: &Path, config: &SyncConfig) -> Result<()> {
    println!("=== sync-cli status ===");
    println!();

    // Check device
    match DeviceConfig::load(data_dir).await {
        Ok(device) => {
            println!("Device:");
            println!("  ID:      {}", device.device_id);
            println!("  Name:    {}", device.device_name);
            println!(
                "  Vectors: {} ({} dims, {})",
                device.vector_space.model,
                device.vector_space.dimension,
                device.vector_space.backend
            );
            println!("  Init:    {}", format_timestamp(device.created_at));
        }
        Err(_) => {
            println!("Device: NOT INITIALIZED");
            println!();
            println!("Run 'sync-cli init --name <name>' to initialize.");
            return Ok(());
        }
    }

    println!();

    let store = JsonDigestStore::open(data_dir).await?;
    println!("History:");
    println!("  Digests: {}", store.len().await);
    if store.is_empty().await {
        println!("  Add some with: sync-cli add <url>");
    }

    println!();

    println!("Sync:");
    println!("  Relay:       {}", config.relay_url);
    println!("  Page size:   {}", config.page_size);
    println!("  Max digests: {}", config.max_digests);

    Ok(())
}

/// Format a Unix millisecond timestamp relative to now.
fn format_timestamp(ts: u64) -> String {
    let diff = now_millis().saturating_sub(ts) / 1000;

    if diff < 60 {
        "just now".to_string()
    } else if diff < 3600 {
        format!("{} minutes ago", diff / 60)
    } else if diff < 86400 {
        format!("{} hours ago", diff / 3600)
    } else {
        format!("{} days ago", diff / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{DeviceClass, VectorSpace};
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_without_init() {
        let dir = tempdir().unwrap();

        // Should succeed but show "not initialized"
        let result = run(dir.path(), &SyncConfig::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn status_with_device() {
        let dir = tempdir().unwrap();

        let device = DeviceConfig::new(
            "Test Device",
            DeviceClass::Desktop,
            VectorSpace::new("all-MiniLM-L6-v2", 384, "onnx"),
        );
        device.save(dir.path()).await.unwrap();

        let result = run(dir.path(), &SyncConfig::default()).await;
        assert!(result.is_ok());
    }

    #[test]
    fn format_timestamp_works() {
        let now = now_millis();

        assert_eq!(format_timestamp(now), "just now");
        assert!(format_timestamp(now - 120_000).contains("minutes"));
        assert!(format_timestamp(now - 7_200_000).contains("hours"));
        assert!(format_timestamp(now - 172_800_000).contains("days"));
    }
}
