//! The master's two periodic ticks (§5): broadcasting the current snapshot
//! to clients and polling nodes, and persisting the snapshot to the store.

use std::time::Duration;

use telemetry_protocol::default_broadcast_command;
use tracing::{debug, warn};

use crate::state::AppState;

/// Tick A. Every `period`, serialize the hub's snapshot to every client,
/// then send the default broadcast command to every node. Broadcast goes
/// out before the poll command, matching the source's read-then-poll
/// ordering.
pub async fn run_broadcast_tick(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let snapshot = state.snapshot_json().await;
        let text = match serde_json::to_string(&snapshot) {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "failed to serialize snapshot for broadcast");
                continue;
            }
        };
        state.broadcast_to_clients(&text).await;
        let command = default_broadcast_command().to_string();
        state.broadcast_to_nodes(&command).await;
    }
}

/// Tick B. Every `period`, persist the current snapshot in one
/// transaction. Schema mismatches are logged and skipped by the store
/// itself; this loop only logs the summary and any hard I/O failure.
pub async fn run_persist_tick(state: AppState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match state.persist_snapshot().await {
            Ok(summary) => {
                debug!(persisted = summary.persisted, skipped = summary.skipped, "persist tick complete");
            }
            Err(err) => {
                warn!(error = %err, "persist tick failed");
            }
        }
    }
}
