use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use metering_client::domain::{Installation, Meter, MeterType};

use crate::api::{ApiError, MeteringApi};
use crate::sinks::RecordSink;

use super::Shutdown;

/// Computes the outstanding time range per installation and walks it in
/// bounded sub-windows, handing completed samples to the sink. One engine
/// instance belongs to one sink module and owns its private inventory.
pub struct BackfillEngine {
    api: Arc<dyn MeteringApi>,
    sink: Arc<dyn RecordSink>,
    meter_type: MeterType,
    window: Duration,
    window_pause: Duration,
    inventory: HashMap<String, (Installation, Vec<Meter>)>,
}

impl BackfillEngine {
    pub fn new(
        api: Arc<dyn MeteringApi>,
        sink: Arc<dyn RecordSink>,
        meter_type: MeterType,
        window: Duration,
        window_pause: Duration,
    ) -> Self {
        Self {
            api,
            sink,
            meter_type,
            window,
            window_pause,
            inventory: HashMap::new(),
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Full replace of the in-memory installation/meter inventory, pushing
    /// fresh metadata to the sink along the way. Any API failure aborts the
    /// whole phase for this cycle; the stale inventory stays in place.
    pub async fn refresh_inventory(&mut self) -> Result<(), ApiError> {
        let ids = self.api.installation_ids().await?;
        tracing::info!(count = ids.len(), "installations retrieved");

        let mut inventory = HashMap::new();
        for id in ids {
            let installation = self.api.installation_info(&id).await?;
            let meters = self.api.meters(&id).await?;
            tracing::info!(
                installation = %id,
                site_ref = %installation.site_ref,
                meters = meters.len(),
                "got installation inventory"
            );

            if let Err(e) = self.sink.record_installation(&installation).await {
                metrics::counter!("sink_errors_total").increment(1);
                tracing::error!(installation = %id, error = %e, "cannot record installation metadata");
            }
            for meter in &meters {
                if let Err(e) = self.sink.record_meter(meter).await {
                    metrics::counter!("sink_errors_total").increment(1);
                    tracing::error!(installation = %id, meter = %meter.id, error = %e, "cannot record meter metadata");
                }
            }

            inventory.insert(id, (installation, meters));
        }

        self.inventory = inventory;
        Ok(())
    }

    /// One backfill pass over every known installation, walking each one up
    /// to `until`. A window failure abandons that installation for this
    /// cycle; the others still get their walk.
    pub async fn run_backfill(&self, until: OffsetDateTime, shutdown: &Shutdown) {
        for (installation, meters) in self.inventory.values() {
            if shutdown.requested() {
                return;
            }
            if let Err(e) = self
                .backfill_installation(installation, meters, until, shutdown)
                .await
            {
                metrics::counter!("api_errors_total").increment(1);
                tracing::error!(
                    installation = %installation.id,
                    error = %e,
                    "backfill aborted for this cycle"
                );
            }
        }
    }

    async fn backfill_installation(
        &self,
        installation: &Installation,
        meters: &[Meter],
        until: OffsetDateTime,
        shutdown: &Shutdown,
    ) -> Result<(), ApiError> {
        let mut cursor = match self.sink.last_synced_at(installation).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::error!(installation = %installation.id, error = %e, "cannot resolve sync cursor, skipping");
                return Ok(());
            }
        };

        while cursor < until && !shutdown.requested() {
            let window_end = next_window_end(cursor, until, self.window);
            tracing::info!(
                installation = %installation.id,
                start = %cursor,
                end = %window_end,
                "fetching history window"
            );

            let samples = self
                .api
                .time_series(&installation.id, meters, self.meter_type, cursor, window_end)
                .await?;

            for sample in &samples {
                match self.sink.record_sample(sample).await {
                    Ok(()) => {
                        metrics::counter!("samples_synced_total").increment(1);
                    }
                    Err(e) => {
                        metrics::counter!("sink_errors_total").increment(1);
                        tracing::error!(
                            installation = %installation.id,
                            ts = %sample.ts,
                            error = %e,
                            "cannot record sample"
                        );
                    }
                }
            }

            // An empty window is treated as "caught up to here"; the cursor
            // advances either way so a quiet period cannot stall the walk.
            cursor = window_end;

            // Pause between windows to stay under upstream rate limits.
            if cursor < until {
                tokio::time::sleep(self.window_pause).await;
            }
        }

        Ok(())
    }
}

/// Windows advance monotonically and never overlap:
/// `[cursor, min(cursor + window, until))`.
fn next_window_end(cursor: OffsetDateTime, until: OffsetDateTime, window: Duration) -> OffsetDateTime {
    let end = cursor + window;
    if end > until {
        until
    } else {
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testutil::{installation, meter, FakeApi, FakeSink};
    use time::macros::datetime;

    const THIRTY_DAYS: Duration = Duration::from_secs(30 * 24 * 60 * 60);

    fn engine_with(
        api: Arc<FakeApi>,
        sink: Arc<FakeSink>,
        window: Duration,
    ) -> BackfillEngine {
        BackfillEngine::new(api, sink, MeterType::Electricity, window, Duration::ZERO)
    }

    fn single_site_fleet() -> Vec<(Installation, Vec<Meter>)> {
        let site = installation("i1", datetime!(2024-01-01 00:00:00 UTC));
        let meters = vec![meter("M1", "i1")];
        vec![(site, meters)]
    }

    #[tokio::test]
    async fn walks_history_in_bounded_windows() {
        let api = Arc::new(FakeApi::new(single_site_fleet()));
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS);

        engine.refresh_inventory().await.unwrap();
        let (_tx, shutdown) = Shutdown::channel();
        engine
            .run_backfill(datetime!(2024-02-20 00:00:00 UTC), &shutdown)
            .await;

        let calls = api.series_calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                (
                    datetime!(2024-01-01 00:00:00 UTC),
                    datetime!(2024-01-31 00:00:00 UTC)
                ),
                (
                    datetime!(2024-01-31 00:00:00 UTC),
                    datetime!(2024-02-20 00:00:00 UTC)
                ),
            ]
        );
    }

    #[tokio::test]
    async fn empty_window_still_advances_the_cursor() {
        let api = Arc::new(FakeApi {
            samples_per_window: 0,
            ..FakeApi::new(single_site_fleet())
        });
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS);

        engine.refresh_inventory().await.unwrap();
        let (_tx, shutdown) = Shutdown::channel();
        engine
            .run_backfill(datetime!(2024-02-20 00:00:00 UTC), &shutdown)
            .await;

        // Both windows were requested even though the first returned nothing.
        assert_eq!(api.series_call_count(), 2);
        assert!(sink.samples.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_failure_aborts_the_walk_and_preserves_the_cursor() {
        let api = Arc::new(FakeApi {
            fail_window_starting_at: Some(datetime!(2024-01-31 00:00:00 UTC)),
            ..FakeApi::new(single_site_fleet())
        });
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS);

        engine.refresh_inventory().await.unwrap();
        let (_tx, shutdown) = Shutdown::channel();
        let until = datetime!(2024-02-20 00:00:00 UTC);
        engine.run_backfill(until, &shutdown).await;

        // First window delivered, second failed, walk stopped there.
        assert_eq!(api.series_call_count(), 2);
        assert_eq!(sink.samples.lock().unwrap().len(), 1);

        // The next cycle resumes from the last delivered sample, before the
        // failed window; nothing was skipped.
        engine.run_backfill(until, &shutdown).await;
        let calls = api.series_calls.lock().unwrap().clone();
        assert_eq!(calls[2].0, datetime!(2024-01-01 00:15:00 UTC));
    }

    #[tokio::test]
    async fn sink_failure_does_not_abort_the_batch() {
        let api = Arc::new(FakeApi {
            samples_per_window: 3,
            ..FakeApi::new(single_site_fleet())
        });
        let sink = Arc::new(FakeSink {
            fail_sample_attempt: Some(1),
            ..FakeSink::new()
        });
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS * 10);

        engine.refresh_inventory().await.unwrap();
        let (_tx, shutdown) = Shutdown::channel();
        engine
            .run_backfill(datetime!(2024-01-02 00:00:00 UTC), &shutdown)
            .await;

        // All three records got a delivery attempt; only the middle one lost.
        assert_eq!(sink.sample_attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(sink.samples.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn inventory_refresh_failure_leaves_nothing_to_walk() {
        let api = Arc::new(FakeApi {
            fail_listing: true,
            ..FakeApi::new(single_site_fleet())
        });
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS);

        assert!(engine.refresh_inventory().await.is_err());

        let (_tx, shutdown) = Shutdown::channel();
        engine
            .run_backfill(datetime!(2024-02-20 00:00:00 UTC), &shutdown)
            .await;
        assert_eq!(api.series_call_count(), 0);
    }

    #[tokio::test]
    async fn zero_meter_installation_yields_aggregate_only_samples() {
        let site = installation("i1", datetime!(2024-01-01 00:00:00 UTC));
        let api = Arc::new(FakeApi::new(vec![(site, Vec::new())]));
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS * 10);

        engine.refresh_inventory().await.unwrap();
        let (_tx, shutdown) = Shutdown::channel();
        engine
            .run_backfill(datetime!(2024-01-02 00:00:00 UTC), &shutdown)
            .await;

        let samples = sink.samples.lock().unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].meters.is_empty());
    }

    #[tokio::test]
    async fn stop_request_is_honored_between_windows() {
        let api = Arc::new(FakeApi::new(single_site_fleet()));
        let sink = Arc::new(FakeSink::new());
        let mut engine = engine_with(api.clone(), sink.clone(), THIRTY_DAYS);

        engine.refresh_inventory().await.unwrap();
        let (tx, shutdown) = Shutdown::channel();
        tx.send(true).unwrap();

        engine
            .run_backfill(datetime!(2024-02-20 00:00:00 UTC), &shutdown)
            .await;
        assert_eq!(api.series_call_count(), 0);
    }

    #[test]
    fn window_end_is_clamped_to_until() {
        let cursor = datetime!(2024-01-01 00:00:00 UTC);
        let until = datetime!(2024-01-10 00:00:00 UTC);
        assert_eq!(next_window_end(cursor, until, THIRTY_DAYS), until);

        let far_until = datetime!(2024-06-01 00:00:00 UTC);
        assert_eq!(
            next_window_end(cursor, far_until, THIRTY_DAYS),
            datetime!(2024-01-31 00:00:00 UTC)
        );
    }
}
