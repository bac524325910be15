use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;

use metering_client::domain::{
    Address, Installation, InstallationSample, Meter, MeterReading, MeterType,
};

use crate::api::{ApiError, AuthError, MeteringApi};
use crate::sinks::{RecordSink, SinkError};

pub fn installation(id: &str, creation_date: OffsetDateTime) -> Installation {
    Installation {
        id: id.to_string(),
        site_ref: format!("SR-{id}"),
        name: format!("Site {id}"),
        creation_date,
        timezone: "Europe/Zurich".to_string(),
        address: Address::default(),
        latitude: 46.5,
        longitude: 6.6,
    }
}

pub fn meter(id: &str, installation_id: &str) -> Meter {
    Meter {
        id: id.to_string(),
        installation_id: installation_id.to_string(),
        meter_type: MeterType::Electricity,
        primary_address: 1,
        is_virtual: false,
    }
}

/// In-memory metering API: serves a fixed fleet and fabricates one sample
/// every 15 minutes of a requested window, up to `samples_per_window`.
pub struct FakeApi {
    pub fleet: Vec<(Installation, Vec<Meter>)>,
    pub fail_listing: bool,
    pub fail_window_starting_at: Option<OffsetDateTime>,
    pub samples_per_window: usize,
    pub listings: AtomicUsize,
    pub series_calls: Mutex<Vec<(OffsetDateTime, OffsetDateTime)>>,
}

impl FakeApi {
    pub fn new(fleet: Vec<(Installation, Vec<Meter>)>) -> Self {
        Self {
            fleet,
            fail_listing: false,
            fail_window_starting_at: None,
            samples_per_window: 1,
            listings: AtomicUsize::new(0),
            series_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn series_call_count(&self) -> usize {
        self.series_calls.lock().unwrap().len()
    }

    fn status_error(operation: &'static str) -> ApiError {
        ApiError::Status {
            operation,
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
    }
}

#[async_trait]
impl MeteringApi for FakeApi {
    async fn installation_ids(&self) -> Result<Vec<String>, ApiError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing {
            return Err(ApiError::Auth {
                operation: "list installations",
                source: AuthError::Rejected {
                    status: reqwest::StatusCode::UNAUTHORIZED,
                    body: "bad credentials".to_string(),
                },
            });
        }
        Ok(self.fleet.iter().map(|(i, _)| i.id.clone()).collect())
    }

    async fn installation_info(&self, installation_id: &str) -> Result<Installation, ApiError> {
        self.fleet
            .iter()
            .find(|(i, _)| i.id == installation_id)
            .map(|(i, _)| i.clone())
            .ok_or_else(|| Self::status_error("installation info"))
    }

    async fn meters(&self, installation_id: &str) -> Result<Vec<Meter>, ApiError> {
        self.fleet
            .iter()
            .find(|(i, _)| i.id == installation_id)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| Self::status_error("meter inventory"))
    }

    async fn time_series(
        &self,
        installation_id: &str,
        meters: &[Meter],
        _meter_type: MeterType,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<InstallationSample>, ApiError> {
        self.series_calls.lock().unwrap().push((start, end));
        if self.fail_window_starting_at == Some(start) {
            return Err(Self::status_error("time series"));
        }

        Ok((0..self.samples_per_window)
            .map(|i| InstallationSample {
                installation_id: installation_id.to_string(),
                ts: start + Duration::from_secs(900 * (i as u64 + 1)),
                conso_total: 1.0,
                from_ext: 0.0,
                prod_total: 2.0,
                self_conso: 0.5,
                storage_charging_total: 0.0,
                storage_discharging_total: 0.0,
                to_ext: 0.5,
                meters: meters
                    .iter()
                    .map(|m| MeterReading {
                        meter_id: m.id.clone(),
                        ext: 0.1,
                        self_conso: 0.2,
                        total: 0.3,
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Records everything it is handed; resolves the cursor like the
/// persistence sink does (latest stored sample, else creation date).
pub struct FakeSink {
    pub samples: Mutex<Vec<InstallationSample>>,
    pub installations: Mutex<Vec<Installation>>,
    pub meters: Mutex<Vec<Meter>>,
    pub sample_attempts: AtomicUsize,
    pub fail_sample_attempt: Option<usize>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            installations: Mutex::new(Vec::new()),
            meters: Mutex::new(Vec::new()),
            sample_attempts: AtomicUsize::new(0),
            fail_sample_attempt: None,
        }
    }
}

#[async_trait]
impl RecordSink for FakeSink {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn record_installation(&self, installation: &Installation) -> Result<(), SinkError> {
        self.installations.lock().unwrap().push(installation.clone());
        Ok(())
    }

    async fn record_meter(&self, meter: &Meter) -> Result<(), SinkError> {
        self.meters.lock().unwrap().push(meter.clone());
        Ok(())
    }

    async fn record_sample(&self, sample: &InstallationSample) -> Result<(), SinkError> {
        let attempt = self.sample_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sample_attempt == Some(attempt) {
            return Err(SinkError::Publish {
                topic: "fake".to_string(),
                reason: "sink unavailable".to_string(),
            });
        }
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }

    async fn last_synced_at(&self, installation: &Installation) -> Result<OffsetDateTime, SinkError> {
        let samples = self.samples.lock().unwrap();
        Ok(samples
            .iter()
            .filter(|s| s.installation_id == installation.id)
            .map(|s| s.ts)
            .max()
            .unwrap_or(installation.creation_date))
    }
}
