use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{BackfillEngine, Shutdown};

/// Drives one sink module: an immediate full cycle (inventory refresh +
/// backfill) on start, then backfill-only cycles at a fixed interval.
///
/// Cycles run one after another on a single task. A tick that lands while
/// a cycle is still in progress is skipped, never queued behind it, so
/// overlap is impossible by construction rather than by interval sizing.
pub struct SyncScheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SyncScheduler {
    pub fn start(mut engine: BackfillEngine, poll_interval: Duration) -> Self {
        let (stop_tx, shutdown) = Shutdown::channel();

        let handle = tokio::spawn(async move {
            let sink = engine.sink_name();
            tracing::info!(sink, "starting sync module");

            if let Err(e) = engine.refresh_inventory().await {
                metrics::counter!("api_errors_total").increment(1);
                tracing::error!(sink, error = %e, "inventory refresh failed, retrying at next start");
            }
            engine
                .run_backfill(OffsetDateTime::now_utc(), &shutdown)
                .await;

            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + poll_interval,
                poll_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut stop_wait = shutdown.clone();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!(sink, "interval tick, running backfill cycle");
                        engine
                            .run_backfill(OffsetDateTime::now_utc(), &shutdown)
                            .await;
                    }
                    _ = stop_wait.wait() => break,
                }
            }
            tracing::info!(sink, "stopping interval requests");
        });

        Self { stop_tx, handle }
    }

    /// Cooperative stop: a cycle already in progress finishes, the next
    /// tick never fires.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.handle.await;
    }
}
