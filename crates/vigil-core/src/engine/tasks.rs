// ── Periodic background tasks ──

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Engine;
use crate::oscillation::OscillationChecker;

/// Expire overdue alive timers every `period`.
pub(super) async fn alive_sweep_task(engine: Engine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let events = engine.inner.supervision.sweep(Utc::now());
                if !events.is_empty() {
                    debug!(expired = events.len(), "alive sweep took entities down");
                }
            }
        }
    }
    debug!("alive sweep task stopped");
}

/// Publish `OscillationExpired` for alarms that stopped flapping.
pub(super) async fn oscillation_check_task(
    engine: Engine,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    let mut checker = OscillationChecker::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired = checker.check(
                    &engine.inner.oscillation,
                    &engine.inner.store.alarms,
                    Utc::now(),
                );
                if !expired.is_empty() {
                    debug!(alarms = expired.len(), "oscillation expired");
                }
            }
        }
    }
    debug!("oscillation check task stopped");
}
