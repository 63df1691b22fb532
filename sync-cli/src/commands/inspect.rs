//! Decode and check a pairing payload without joining.

use anyhow::{Context, Result};
use sync_client::PairingPayload;
use sync_types::now_millis;

/// Run the inspect command.
pub fn run(code: &str) -> Result<()> {
    let payload = PairingPayload::parse(code).context("Invalid pairing payload")?;

    println!("Pairing payload:");
    println!();
    println!("  Device:  {}", payload.device_id);
    println!("  Relay:   {}", payload.signaling_url);
    println!("  Room:    {}", payload.room_id);
    println!("  Version: {}", payload.version);
    println!("  Expires: {}", expiry_label(payload.expires_at, now_millis()));
    println!();

    match payload.validate() {
        Ok(()) => println!("Payload is valid."),
        Err(e) => println!("Payload is NOT usable: {}", e),
    }
    Ok(())
}

fn expiry_label(expires_at: u64, now: u64) -> String {
    if expires_at <= now {
        let ago = (now - expires_at) / 1000;
        format!("expired {}s ago", ago)
    } else {
        let left = (expires_at - now) / 1000;
        format!("in {}m {}s", left / 60, left % 60)
    }
}
