use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use sync_service::{
    api::HttpMeteringApi,
    config::AppConfig,
    observability,
    sinks::PostgresSink,
    sync::{BackfillEngine, Shutdown},
};

/// One-shot inventory refresh plus a single backfill pass against the
/// Postgres sink, then exit. Useful for the initial history load or to
/// repair a gap without waiting for the service interval.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Can point SYNC_CONFIG to a backfill-specific file.
    let cfg = AppConfig::load()?;
    let Some(pg_cfg) = &cfg.postgres else {
        bail!("backfill_once requires a [postgres] section in the config");
    };

    let pool = PgPoolOptions::new()
        .max_connections(pg_cfg.max_connections)
        .connect(&pg_cfg.uri)
        .await?;

    let api = Arc::new(HttpMeteringApi::new(
        &cfg.api.base_url,
        &cfg.api.username,
        &cfg.api.password,
    ));
    let mut engine = BackfillEngine::new(
        api,
        Arc::new(PostgresSink::new(pool)),
        cfg.sync.meter_type,
        Duration::from_secs(cfg.sync.window_days * 24 * 60 * 60),
        Duration::from_secs(cfg.sync.window_pause_secs),
    );

    engine.refresh_inventory().await?;

    let (_stop_tx, shutdown) = Shutdown::channel();
    engine
        .run_backfill(OffsetDateTime::now_utc(), &shutdown)
        .await;

    Ok(())
}
