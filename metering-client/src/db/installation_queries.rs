use sqlx::PgPool;

use crate::domain::{Installation, Meter};

/// Insert an installation, or update all non-key columns if it already exists.
pub async fn upsert_installation(pool: &PgPool, installation: &Installation) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO installations (installation_id, site_ref, name, timezone, creation_date, latitude, longitude)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (installation_id)
        DO UPDATE SET
            site_ref = EXCLUDED.site_ref,
            name = EXCLUDED.name,
            timezone = EXCLUDED.timezone,
            creation_date = EXCLUDED.creation_date,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude
        "#,
    )
    .bind(&installation.id)
    .bind(&installation.site_ref)
    .bind(&installation.name)
    .bind(&installation.timezone)
    .bind(installation.creation_date)
    .bind(installation.latitude)
    .bind(installation.longitude)
    .execute(pool)
    .await
    .map(|_| ())
}

/// Insert a meter, or update all non-key columns if it already exists.
pub async fn upsert_meter(pool: &PgPool, meter: &Meter) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO meters (meter_id, installation_id, meter_type, primary_address, virtual)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (meter_id)
        DO UPDATE SET
            installation_id = EXCLUDED.installation_id,
            meter_type = EXCLUDED.meter_type,
            primary_address = EXCLUDED.primary_address,
            virtual = EXCLUDED.virtual
        "#,
    )
    .bind(&meter.id)
    .bind(&meter.installation_id)
    .bind(meter.meter_type.as_str())
    .bind(meter.primary_address)
    .bind(meter.is_virtual)
    .execute(pool)
    .await
    .map(|_| ())
}
