//! Running a sync session from the terminal.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use sync_client::{SessionState, SyncConfig, SyncOrchestrator, SyncProgress, WebSocketTransport};

use crate::config::DeviceConfig;
use crate::store::JsonDigestStore;

/// An orchestrator wired to this device's identity and digest file.
pub async fn build_orchestrator(
    data_dir: &Path,
    config: SyncConfig,
) -> Result<SyncOrchestrator<WebSocketTransport>> {
    let device = DeviceConfig::load(data_dir).await?;
    let store = Arc::new(JsonDigestStore::open(data_dir).await?);
    tracing::debug!(digests = store.len().await, "digest store opened");

    Ok(SyncOrchestrator::with_websocket(
        config,
        store,
        Arc::new(device.vector_space.clone()),
        Arc::new(device.device_info()),
    ))
}

/// Print progress until the session ends. Ctrl-C cancels the session.
pub async fn watch(orchestrator: &SyncOrchestrator<WebSocketTransport>) -> Result<SyncProgress> {
    let mut progress = orchestrator.progress();
    let mut last_state = None;

    loop {
        let current = progress.borrow_and_update().clone();
        if last_state != Some(current.state) {
            println!("  [{}] {}", state_label(current.state), describe(&current));
            last_state = Some(current.state);
        }
        if current.state.is_terminal() {
            return Ok(current);
        }

        tokio::select! {
            changed = progress.changed() => {
                if changed.is_err() {
                    return Ok(progress.borrow().clone());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                orchestrator.cancel_sync().await;
                anyhow::bail!("Cancelled");
            }
        }
    }
}

/// Print the outcome of a finished session, failing on a failed one.
pub fn report(progress: &SyncProgress) -> Result<()> {
    println!();
    match (&progress.state, &progress.failure) {
        (SessionState::Complete, _) => {
            println!("Sync complete!");
            println!();
            println!(
                "  Sent:     {} batches ({} acknowledged)",
                progress.batches_sent, progress.batches_acked
            );
            println!("  Received: {} batches", progress.batches_received);
            println!("  New:      {} digests", progress.digests_saved);
            println!("  Merged:   {} digests", progress.digests_merged);
            println!("  Skipped:  {} digests", progress.digests_skipped);
            if progress.digests_discarded > 0 {
                println!(
                    "  Dropped:  {} digests (peer stopped before sending every batch)",
                    progress.digests_discarded
                );
            }
            Ok(())
        }
        (_, Some(failure)) => anyhow::bail!(
            "Sync failed during '{}' ({}): {}",
            failure.operation,
            failure.kind,
            failure.message
        ),
        (state, None) => anyhow::bail!("Sync ended in state {}", state_label(*state)),
    }
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "idle",
        SessionState::Initiating => "initiating",
        SessionState::Waiting => "waiting",
        SessionState::Connected => "connected",
        SessionState::Syncing => "syncing",
        SessionState::Complete => "complete",
        SessionState::Failed => "failed",
    }
}

fn describe(progress: &SyncProgress) -> String {
    match progress.state {
        SessionState::Waiting => "waiting for the other device".to_string(),
        SessionState::Connected => match &progress.peer_device_id {
            Some(peer) => format!("connected to {}", peer),
            None => "connected".to_string(),
        },
        SessionState::Syncing => format!(
            "exchanging history ({} batches to send)",
            progress.batches_total
        ),
        SessionState::Complete => "done".to_string(),
        SessionState::Failed => "session failed".to_string(),
        SessionState::Idle | SessionState::Initiating => "starting".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::Failure;
    use sync_types::{DeviceId, ErrorKind};

    #[test]
    fn complete_session_reports_ok() {
        let progress = SyncProgress {
            state: SessionState::Complete,
            batches_sent: 2,
            digests_saved: 3,
            ..SyncProgress::default()
        };
        assert!(report(&progress).is_ok());
    }

    #[test]
    fn failed_session_reports_the_operation() {
        let progress = SyncProgress {
            state: SessionState::Failed,
            failure: Some(Failure {
                kind: ErrorKind::VectorIncompatible,
                operation: "compare vector spaces".into(),
                message: "model mismatch".into(),
            }),
            ..SyncProgress::default()
        };
        let err = report(&progress).unwrap_err().to_string();
        assert!(err.contains("compare vector spaces"));
        assert!(err.contains("model mismatch"));
    }

    #[test]
    fn connected_names_the_peer() {
        let progress = SyncProgress {
            state: SessionState::Connected,
            peer_device_id: Some(DeviceId::new("device-b")),
            ..SyncProgress::default()
        };
        assert!(describe(&progress).contains("device-b"));
    }
}
