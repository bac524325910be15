use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use metering_client::domain::{Installation, InstallationSample, Meter};

use super::{RecordSink, SinkError};
use crate::config::MqttConfig;

/// Narrow boundary to the MQTT wire client: hierarchical topic paths under
/// a configured prefix, one value per topic.
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError>;
}

pub struct RumqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    retain: bool,
}

impl RumqttPublisher {
    /// Builds the client and spawns the event-loop task that keeps the
    /// connection alive. Connection errors are logged and retried; publishes
    /// fail individually in the meantime.
    pub fn connect(cfg: &MqttConfig) -> Self {
        let client_id = format!("metering-sync-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(30));
        if !cfg.username.is_empty() {
            options.set_credentials(&cfg.username, &cfg.password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        tokio::spawn(async move {
            loop {
                if let Err(e) = event_loop.poll().await {
                    tracing::warn!(error = %e, "mqtt connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        });

        Self {
            client,
            topic_prefix: cfg.topic_prefix.clone(),
            retain: cfg.retain,
        }
    }
}

#[async_trait]
impl TopicPublisher for RumqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), SinkError> {
        let full_topic = format!("{}/{}", self.topic_prefix, topic);
        self.client
            .publish(full_topic.as_str(), QoS::AtLeastOnce, self.retain, payload)
            .await
            .map_err(|e| SinkError::Publish {
                topic: full_topic,
                reason: e.to_string(),
            })
    }
}

/// Publish sink: flattens each record into per-field topics and delivers
/// every key independently. Its cursor lives only in memory, so a fresh
/// process starts a bounded lookback behind now instead of replaying the
/// full history onto the bus.
pub struct MqttSink {
    publisher: Box<dyn TopicPublisher>,
    cursors: Mutex<HashMap<String, OffsetDateTime>>,
    lookback: Duration,
}

impl MqttSink {
    pub fn new(publisher: Box<dyn TopicPublisher>, lookback: Duration) -> Self {
        Self {
            publisher,
            cursors: Mutex::new(HashMap::new()),
            lookback,
        }
    }

    /// Attempts every key before reporting the first failure, so one bad
    /// topic never blocks its siblings.
    async fn publish_all(&self, entries: Vec<(String, String)>) -> Result<(), SinkError> {
        let mut first_err = None;
        for (topic, payload) in entries {
            if let Err(e) = self.publisher.publish(&topic, payload).await {
                tracing::error!(topic = %topic, error = %e, "cannot publish");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

fn installation_topics(installation: &Installation) -> Vec<(String, String)> {
    let root = format!("installation/{}", installation.id);
    let creation_date = installation
        .creation_date
        .format(&Rfc3339)
        .unwrap_or_default();
    vec![
        (format!("{root}/name"), installation.name.clone()),
        (format!("{root}/site_ref"), installation.site_ref.clone()),
        (format!("{root}/timezone"), installation.timezone.clone()),
        (format!("{root}/creation_date"), creation_date),
        (format!("{root}/latitude"), installation.latitude.to_string()),
        (format!("{root}/longitude"), installation.longitude.to_string()),
    ]
}

fn meter_topics(meter: &Meter) -> Vec<(String, String)> {
    let root = format!(
        "installation/{}/meters/{}",
        meter.installation_id, meter.id
    );
    vec![
        (format!("{root}/type"), meter.meter_type.to_string()),
        (
            format!("{root}/primary_address"),
            meter.primary_address.to_string(),
        ),
        (format!("{root}/virtual"), meter.is_virtual.to_string()),
    ]
}

fn sample_topics(sample: &InstallationSample) -> Vec<(String, String)> {
    let root = format!("installation/{}", sample.installation_id);
    let timestamp = sample.ts.format(&Rfc3339).unwrap_or_default();

    let mut entries = vec![
        (format!("{root}/conso_total"), sample.conso_total.to_string()),
        (format!("{root}/from_ext"), sample.from_ext.to_string()),
        (format!("{root}/prod_total"), sample.prod_total.to_string()),
        (format!("{root}/self"), sample.self_conso.to_string()),
        (
            format!("{root}/storage_charging_total"),
            sample.storage_charging_total.to_string(),
        ),
        (
            format!("{root}/storage_discharging_total"),
            sample.storage_discharging_total.to_string(),
        ),
        (format!("{root}/to_ext"), sample.to_ext.to_string()),
        (format!("{root}/timestamp"), timestamp.clone()),
    ];

    for reading in &sample.meters {
        let meter_root = format!("{root}/meters/{}", reading.meter_id);
        entries.push((format!("{meter_root}/ext"), reading.ext.to_string()));
        entries.push((format!("{meter_root}/self"), reading.self_conso.to_string()));
        entries.push((format!("{meter_root}/total"), reading.total.to_string()));
        entries.push((format!("{meter_root}/timestamp"), timestamp.clone()));
    }

    entries
}

#[async_trait]
impl RecordSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn record_installation(&self, installation: &Installation) -> Result<(), SinkError> {
        self.publish_all(installation_topics(installation)).await
    }

    async fn record_meter(&self, meter: &Meter) -> Result<(), SinkError> {
        self.publish_all(meter_topics(meter)).await
    }

    async fn record_sample(&self, sample: &InstallationSample) -> Result<(), SinkError> {
        let result = self.publish_all(sample_topics(sample)).await;

        let mut cursors = self.cursors.lock().await;
        let cursor = cursors
            .entry(sample.installation_id.clone())
            .or_insert(sample.ts);
        if sample.ts > *cursor {
            *cursor = sample.ts;
        }

        result
    }

    async fn last_synced_at(&self, installation: &Installation) -> Result<OffsetDateTime, SinkError> {
        let cursors = self.cursors.lock().await;
        Ok(cursors
            .get(&installation.id)
            .copied()
            .unwrap_or_else(|| OffsetDateTime::now_utc() - self.lookback))
    }
}
