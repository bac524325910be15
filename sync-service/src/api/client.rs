use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use metering_client::domain::{
    Address, Installation, InstallationSample, Meter, MeterReading, MeterType,
};

use super::error::ApiError;
use super::session::SessionManager;

/// Wire format for time-series bounds and row timestamps: UTC with an
/// implicit offset, space-separated. The API rejects offset suffixes.
const WIRE_TS_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const WIRE_DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Typed access to the metering API. The HTTP implementation lives in
/// [`HttpMeteringApi`]; the trait is the seam the sync engine is tested
/// through.
#[async_trait]
pub trait MeteringApi: Send + Sync {
    async fn installation_ids(&self) -> Result<Vec<String>, ApiError>;

    async fn installation_info(&self, installation_id: &str) -> Result<Installation, ApiError>;

    async fn meters(&self, installation_id: &str) -> Result<Vec<Meter>, ApiError>;

    /// Windowed time-series rows for `[start, end)`, mapped into one sample
    /// per timestamp with one reading per known meter.
    async fn time_series(
        &self,
        installation_id: &str,
        meters: &[Meter],
        meter_type: MeterType,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<InstallationSample>, ApiError>;
}

pub struct HttpMeteringApi {
    http: Client,
    base_url: String,
    session: SessionManager,
}

impl HttpMeteringApi {
    pub fn new(base_url: &str, username: &str, password: &str) -> Self {
        let http = Client::new();
        let session = SessionManager::new(http.clone(), base_url, username, password);
        Self {
            http,
            base_url: base_url.to_string(),
            session,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<T, ApiError> {
        let token = self
            .session
            .bearer_token()
            .await
            .map_err(|source| ApiError::Auth { operation, source })?;

        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;

        decode_response(operation, resp).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<T, ApiError> {
        let token = self
            .session
            .bearer_token()
            .await
            .map_err(|source| ApiError::Auth { operation, source })?;

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Transport { operation, source })?;

        decode_response(operation, resp).await
    }
}

async fn decode_response<T: DeserializeOwned>(
    operation: &'static str,
    resp: reqwest::Response,
) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|source| ApiError::Transport { operation, source })?;

    if !status.is_success() {
        return Err(ApiError::Status {
            operation,
            status,
            body,
        });
    }

    serde_json::from_str(&body).map_err(|source| ApiError::Decode {
        operation,
        status,
        body,
        source,
    })
}

#[derive(Deserialize)]
struct InstallationInfoDto {
    site_ref: String,
    name: String,
    creation_date: String,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    address: Address,
    #[serde(default)]
    latitude: f64,
    #[serde(default)]
    longitude: f64,
}

#[derive(Deserialize)]
struct MeterInfoDto {
    id: String,
    #[serde(rename = "type")]
    meter_type: MeterType,
    prim_ad: i32,
    #[serde(rename = "virtual")]
    is_virtual: bool,
}

#[derive(Serialize)]
struct TimeSeriesRequest {
    t_s: String,
    t_e: String,
}

#[async_trait]
impl MeteringApi for HttpMeteringApi {
    async fn installation_ids(&self) -> Result<Vec<String>, ApiError> {
        self.get_json("list installations", "v1/all_installations")
            .await
    }

    async fn installation_info(&self, installation_id: &str) -> Result<Installation, ApiError> {
        let operation = "installation info";
        let dto: InstallationInfoDto = self
            .get_json(operation, &format!("v1/installation_infos/{installation_id}"))
            .await?;
        installation_from_dto(operation, installation_id, dto)
    }

    async fn meters(&self, installation_id: &str) -> Result<Vec<Meter>, ApiError> {
        let dtos: Vec<MeterInfoDto> = self
            .get_json("meter inventory", &format!("v1/meter_info/{installation_id}"))
            .await?;

        Ok(dtos
            .into_iter()
            .map(|dto| Meter {
                id: dto.id,
                installation_id: installation_id.to_string(),
                meter_type: dto.meter_type,
                primary_address: dto.prim_ad,
                is_virtual: dto.is_virtual,
            })
            .collect())
    }

    async fn time_series(
        &self,
        installation_id: &str,
        meters: &[Meter],
        meter_type: MeterType,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<InstallationSample>, ApiError> {
        let operation = "time series";
        let body = TimeSeriesRequest {
            t_s: format_wire_timestamp(operation, start)?,
            t_e: format_wire_timestamp(operation, end)?,
        };

        let rows: Vec<Map<String, Value>> = self
            .post_json(
                operation,
                &format!("v1/site_data/{installation_id}/{meter_type}"),
                &body,
            )
            .await?;

        rows.iter()
            .map(|row| map_row(operation, installation_id, meters, row))
            .collect()
    }
}

fn installation_from_dto(
    operation: &'static str,
    installation_id: &str,
    dto: InstallationInfoDto,
) -> Result<Installation, ApiError> {
    let creation_date = parse_wire_timestamp(&dto.creation_date).map_err(|e| ApiError::Mapping {
        operation,
        reason: format!("bad creation_date '{}': {e}", dto.creation_date),
    })?;

    Ok(Installation {
        id: installation_id.to_string(),
        site_ref: dto.site_ref,
        name: dto.name,
        creation_date,
        timezone: dto.timezone,
        address: dto.address,
        latitude: dto.latitude,
        longitude: dto.longitude,
    })
}

/// One loosely-keyed row into a typed sample. Aggregate flows come from
/// well-known keys; per-meter readings from `ext_<id>` / `self_<id>` /
/// `total_<id>`, strictly by suffix.
fn map_row(
    operation: &'static str,
    installation_id: &str,
    meters: &[Meter],
    row: &Map<String, Value>,
) -> Result<InstallationSample, ApiError> {
    let raw_ts = row
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Mapping {
            operation,
            reason: "row has no string 'timestamp' field".to_string(),
        })?;
    let ts = parse_wire_timestamp(raw_ts).map_err(|e| ApiError::Mapping {
        operation,
        reason: format!("bad timestamp '{raw_ts}': {e}"),
    })?;

    let readings = meters
        .iter()
        .map(|meter| {
            Ok(MeterReading {
                meter_id: meter.id.clone(),
                ext: numeric_field(operation, row, &format!("ext_{}", meter.id))?,
                self_conso: numeric_field(operation, row, &format!("self_{}", meter.id))?,
                total: numeric_field(operation, row, &format!("total_{}", meter.id))?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(InstallationSample {
        installation_id: installation_id.to_string(),
        ts,
        conso_total: numeric_field(operation, row, "conso_total")?,
        from_ext: numeric_field(operation, row, "from_ext")?,
        prod_total: numeric_field(operation, row, "prod_total")?,
        self_conso: numeric_field(operation, row, "self")?,
        storage_charging_total: numeric_field(operation, row, "storage_charging_total")?,
        storage_discharging_total: numeric_field(operation, row, "storage_discharging_total")?,
        to_ext: numeric_field(operation, row, "to_ext")?,
        meters: readings,
    })
}

/// A missing key reads as zero. A present value of any non-numeric type is
/// a decode error, never silently coerced.
fn numeric_field(
    operation: &'static str,
    row: &Map<String, Value>,
    key: &str,
) -> Result<f64, ApiError> {
    match row.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ApiError::Mapping {
            operation,
            reason: format!("value of '{key}' is not representable as f64"),
        }),
        Some(other) => Err(ApiError::Mapping {
            operation,
            reason: format!("value of '{key}' is {}, expected a number", value_kind(other)),
        }),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn format_wire_timestamp(
    operation: &'static str,
    ts: OffsetDateTime,
) -> Result<String, ApiError> {
    ts.to_offset(UtcOffset::UTC)
        .format(WIRE_TS_FORMAT)
        .map_err(|e| ApiError::Mapping {
            operation,
            reason: format!("cannot format timestamp {ts}: {e}"),
        })
}

/// Accepts the API's space-separated UTC form, RFC3339, and a bare date
/// (used by `creation_date`).
fn parse_wire_timestamp(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(raw, WIRE_TS_FORMAT) {
        return Ok(dt.assume_utc());
    }
    Date::parse(raw, WIRE_DATE_FORMAT).map(|d| d.midnight().assume_utc())
}
