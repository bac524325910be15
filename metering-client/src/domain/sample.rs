use time::OffsetDateTime;

/// One timestamped set of aggregate energy flows for an installation,
/// plus one reading per meter belonging to it.
///
/// `(installation_id, ts)` is the natural key for idempotent storage;
/// `(meter_id, ts)` for the contained readings.
#[derive(Debug, Clone)]
pub struct InstallationSample {
    pub installation_id: String,
    pub ts: OffsetDateTime,
    pub conso_total: f64,
    pub from_ext: f64,
    pub prod_total: f64,
    pub self_conso: f64,
    pub storage_charging_total: f64,
    pub storage_discharging_total: f64,
    pub to_ext: f64,
    pub meters: Vec<MeterReading>,
}

#[derive(Debug, Clone)]
pub struct MeterReading {
    pub meter_id: String,
    pub ext: f64,
    pub self_conso: f64,
    pub total: f64,
}
