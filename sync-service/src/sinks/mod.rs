pub mod mqtt;
pub mod postgres;

pub use mqtt::MqttSink;
pub use postgres::PostgresSink;

use async_trait::async_trait;
use time::OffsetDateTime;

use metering_client::domain::{Installation, InstallationSample, Meter};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("database write failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// A consumer of synchronized records. A failure is scoped to the record it
/// was reported for; callers log it and continue with sibling records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn record_installation(&self, installation: &Installation) -> Result<(), SinkError>;

    async fn record_meter(&self, meter: &Meter) -> Result<(), SinkError>;

    async fn record_sample(&self, sample: &InstallationSample) -> Result<(), SinkError>;

    /// Last timestamp known to be fully synchronized for this installation.
    /// The backfill walk resumes from here.
    async fn last_synced_at(&self, installation: &Installation) -> Result<OffsetDateTime, SinkError>;
}
