// crates/erp-ingest-server/src/reaper.rs
// ============================================================================
// Module: Ledger Reaper
// Description: Periodic cleanup of abandoned and expired ledger records.
// Purpose: Keep the idempotency ledger bounded while the server runs.
// Dependencies: erp-ingest-core, tokio, tracing
// ============================================================================

use std::time::Duration;

use erp_ingest_core::IdempotencyLedger;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Spawns a task that calls [`IdempotencyLedger::reap`] every `interval`.
///
/// Failures are logged and the next tick retries. The task runs until the
/// handle is aborted or the runtime shuts down.
#[must_use]
pub fn spawn_reaper(ledger: IdempotencyLedger, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = ledger.reap().await {
                tracing::warn!(error = %err, "idempotency reaper pass failed");
            }
        }
    })
}
