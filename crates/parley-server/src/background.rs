//! Background tasks for the Parley server.
//!
//! Includes:
//! - Sweeping media streams that stopped sending anything.

use crate::relay::MediaRelay;
use std::sync::Weak;
use tokio::time::{sleep, Duration};

/// Starts the stale connection sweep.
///
/// Every `interval` this tears down connections idle past the relay's stale
/// threshold. The task holds the relay weakly and exits once it is dropped.
pub async fn start_sweep_task(relay: Weak<MediaRelay>, interval: Duration) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "starting stale connection sweep task"
    );

    loop {
        sleep(interval).await;

        let Some(active) = relay.upgrade() else {
            tracing::debug!("media relay dropped, sweep task exiting");
            return;
        };

        let swept = active.sweep_stale().await;
        if swept.is_empty() {
            tracing::debug!(open = active.connection_count(), "no stale media streams");
        } else {
            tracing::info!(count = swept.len(), "swept stale media streams");
        }
    }
}
