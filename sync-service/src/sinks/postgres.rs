use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use metering_client::db::{installation_queries, sample_queries};
use metering_client::domain::{Installation, InstallationSample, Meter};

use super::{RecordSink, SinkError};

/// Persistence sink: one upsert per row, keyed so that repeating a window
/// is idempotent. The pool is owned here and not shared with the API client.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordSink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn record_installation(&self, installation: &Installation) -> Result<(), SinkError> {
        installation_queries::upsert_installation(&self.pool, installation)
            .await
            .map_err(SinkError::from)
    }

    async fn record_meter(&self, meter: &Meter) -> Result<(), SinkError> {
        installation_queries::upsert_meter(&self.pool, meter)
            .await
            .map_err(SinkError::from)
    }

    async fn record_sample(&self, sample: &InstallationSample) -> Result<(), SinkError> {
        // An aggregate-row failure must not prevent the meter-detail upserts
        // for the same timestamp.
        let mut first_err = sample_queries::upsert_installation_sample(&self.pool, sample)
            .await
            .err();
        if let Some(e) = &first_err {
            tracing::error!(
                installation = %sample.installation_id,
                ts = %sample.ts,
                error = %e,
                "cannot upsert installation sample"
            );
        }

        for reading in &sample.meters {
            if let Err(e) =
                sample_queries::upsert_meter_reading(&self.pool, sample.ts, reading).await
            {
                tracing::error!(
                    meter = %reading.meter_id,
                    ts = %sample.ts,
                    error = %e,
                    "cannot upsert meter reading"
                );
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e.into()),
        }
    }

    async fn last_synced_at(&self, installation: &Installation) -> Result<OffsetDateTime, SinkError> {
        let last = sample_queries::last_sample_at(&self.pool, &installation.id).await?;
        Ok(last.unwrap_or(installation.creation_date))
    }
}
