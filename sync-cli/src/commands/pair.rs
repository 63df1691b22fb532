//! Pairing commands: start a session, or answer one from a payload.

use anyhow::{Context, Result};
use std::path::Path;
use sync_client::{PairingPayload, SyncConfig};

use crate::session::{build_orchestrator, report, watch};

/// Start a session as the initiator and print the payload to share.
pub async fn create(data_dir: &Path, config: SyncConfig) -> Result<()> {
    let ttl = config.pairing_ttl();
    let relay_url = config.relay_url.clone();
    let orchestrator = build_orchestrator(data_dir, config).await?;

    let payload = orchestrator
        .initiate_pairing()
        .await
        .with_context(|| format!("Failed to start pairing via {}", relay_url))?;

    println!("Pairing started!");
    println!();
    println!("  Room:    {}", payload.room_id);
    println!("  Relay:   {}", payload.signaling_url);
    println!();
    println!("On the other device, run:");
    println!();
    println!("  sync-cli pair --join {}", payload.to_link()?);
    println!();
    println!("QR payload:");
    println!("  {}", payload.to_json()?);
    println!();
    println!("The payload expires in {} minutes.", ttl.as_secs() / 60);
    println!();

    let finished = watch(&orchestrator).await?;
    report(&finished)
}

/// Answer a session from a payload shown by the initiator.
pub async fn join(data_dir: &Path, config: SyncConfig, code: &str) -> Result<()> {
    let payload = PairingPayload::parse(code).context("Invalid pairing payload")?;
    if payload.is_expired() {
        anyhow::bail!("Pairing payload has expired. Request a new one.");
    }

    let orchestrator = build_orchestrator(data_dir, config).await?;
    orchestrator
        .accept_pairing(&payload)
        .await
        .with_context(|| format!("Failed to join room via {}", payload.signaling_url))?;

    println!("Joined pairing room {}", payload.room_id);
    println!();

    let finished = watch(&orchestrator).await?;
    report(&finished)
}
