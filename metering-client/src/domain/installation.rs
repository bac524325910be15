use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A physical site with its own meters and energy flows.
///
/// `id` is the opaque upstream identifier; `site_ref` is the human-stable
/// key used for topics and reporting.
#[derive(Debug, Clone)]
pub struct Installation {
    pub id: String,
    pub site_ref: String,
    pub name: String,
    pub creation_date: OffsetDateTime,
    pub timezone: String,
    pub address: Address,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Address {
    #[serde(default)]
    pub street_name: String,
    #[serde(default)]
    pub street_number: String,
    #[serde(default)]
    pub city_name: String,
    #[serde(default)]
    pub city_ref: i16,
}

/// A sub-device within an installation measuring a single utility type.
#[derive(Debug, Clone)]
pub struct Meter {
    pub id: String,
    pub installation_id: String,
    pub meter_type: MeterType,
    pub primary_address: i32,
    pub is_virtual: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterType {
    Electricity,
    Heating,
    ColdWater,
    HotWater,
    ChargePoint,
}

impl MeterType {
    /// Wire spelling, used in URL paths, topic values and table columns.
    pub fn as_str(&self) -> &'static str {
        match self {
            MeterType::Electricity => "electricity",
            MeterType::Heating => "heating",
            MeterType::ColdWater => "cold_water",
            MeterType::HotWater => "hot_water",
            MeterType::ChargePoint => "charge_point",
        }
    }
}

impl fmt::Display for MeterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
