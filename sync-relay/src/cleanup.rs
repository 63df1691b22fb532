//! Background sweep for idle rooms.
//!
//! Runs periodically to delete rooms whose inactivity timer has run out.

use crate::config::RoomsConfig;
use crate::server::SyncRelay;
use std::sync::Arc;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<SyncRelay>,
    config: RoomsConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let timeout = config.inactivity_timeout();
        tracing::info!(
            "Room sweep started (interval: {}s, timeout: {}s)",
            config.sweep_interval().as_secs(),
            timeout.as_secs()
        );

        let mut timer = interval(config.sweep_interval());

        loop {
            timer.tick().await;

            let expired = relay.expire_idle_rooms(timeout);
            if expired > 0 {
                tracing::info!("Cleanup: expired {} idle rooms", expired);
            } else {
                tracing::debug!("Cleanup: no idle rooms");
            }
        }
    })
}
