use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;

use sync_service::{
    api::HttpMeteringApi,
    config::AppConfig,
    metrics_server, observability,
    sinks::{mqtt::RumqttPublisher, MqttSink, PostgresSink, RecordSink},
    sync::{BackfillEngine, SyncScheduler},
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let mut schedulers = Vec::new();

    if let Some(mqtt_cfg) = &cfg.mqtt {
        let publisher = RumqttPublisher::connect(mqtt_cfg);
        let sink: Arc<dyn RecordSink> = Arc::new(MqttSink::new(
            Box::new(publisher),
            Duration::from_secs(cfg.sync.publish_lookback_mins * 60),
        ));
        schedulers.push(start_module(&cfg, sink));
    }

    if let Some(pg_cfg) = &cfg.postgres {
        let pool = PgPoolOptions::new()
            .max_connections(pg_cfg.max_connections)
            .connect(&pg_cfg.uri)
            .await?;
        let sink: Arc<dyn RecordSink> = Arc::new(PostgresSink::new(pool));
        schedulers.push(start_module(&cfg, sink));
    }

    if schedulers.is_empty() {
        tracing::warn!("no sink configured, nothing to synchronize");
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    for scheduler in schedulers {
        scheduler.stop().await;
    }

    Ok(())
}

/// Each module owns its own API client and session; nothing is shared
/// across modules.
fn start_module(cfg: &AppConfig, sink: Arc<dyn RecordSink>) -> SyncScheduler {
    let api = Arc::new(HttpMeteringApi::new(
        &cfg.api.base_url,
        &cfg.api.username,
        &cfg.api.password,
    ));
    let engine = BackfillEngine::new(
        api,
        sink,
        cfg.sync.meter_type,
        Duration::from_secs(cfg.sync.window_days * 24 * 60 * 60),
        Duration::from_secs(cfg.sync.window_pause_secs),
    );
    SyncScheduler::start(engine, Duration::from_secs(cfg.sync.poll_interval_secs))
}
