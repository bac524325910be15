use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::{InstallationSample, MeterReading};

/// Upsert the aggregate flows for one `(installation_id, date_time)` row.
pub async fn upsert_installation_sample(pool: &PgPool, sample: &InstallationSample) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO installation_samples
            (installation_id, date_time, conso_total, from_ext, prod_total, self,
             storage_charging_total, storage_discharging_total, to_ext)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (installation_id, date_time)
        DO UPDATE SET
            conso_total = EXCLUDED.conso_total,
            from_ext = EXCLUDED.from_ext,
            prod_total = EXCLUDED.prod_total,
            self = EXCLUDED.self,
            storage_charging_total = EXCLUDED.storage_charging_total,
            storage_discharging_total = EXCLUDED.storage_discharging_total,
            to_ext = EXCLUDED.to_ext
        "#,
    )
    .bind(&sample.installation_id)
    .bind(sample.ts)
    .bind(sample.conso_total)
    .bind(sample.from_ext)
    .bind(sample.prod_total)
    .bind(sample.self_conso)
    .bind(sample.storage_charging_total)
    .bind(sample.storage_discharging_total)
    .bind(sample.to_ext)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Upsert one meter reading for a `(meter_id, date_time)` row.
pub async fn upsert_meter_reading(
    pool: &PgPool,
    ts: OffsetDateTime,
    reading: &MeterReading,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO meter_samples (meter_id, date_time, ext, self, total)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (meter_id, date_time)
        DO UPDATE SET
            ext = EXCLUDED.ext,
            self = EXCLUDED.self,
            total = EXCLUDED.total
        "#,
    )
    .bind(&reading.meter_id)
    .bind(ts)
    .bind(reading.ext)
    .bind(reading.self_conso)
    .bind(reading.total)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Most recent stored sample timestamp for an installation, if any.
pub async fn last_sample_at(
    pool: &PgPool,
    installation_id: &str,
) -> Result<Option<OffsetDateTime>, sqlx::Error> {
    sqlx::query_scalar::<_, OffsetDateTime>(
        r#"
        SELECT date_time
        FROM installation_samples
        WHERE installation_id = $1
        ORDER BY date_time DESC
        LIMIT 1
        "#,
    )
    .bind(installation_id)
    .fetch_optional(pool)
    .await
}
