use reqwest::StatusCode;

/// Token refresh failed. The request that needed the token must not be
/// sent; the previous (expired) session stays in place.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("auth rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("auth response is not decodable: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("auth token expiry {epoch_ms}ms is not a representable instant")]
    InvalidExpiry { epoch_ms: i64 },
}

/// One metering API call failed; scoped to that call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{operation}: could not obtain a valid token")]
    Auth {
        operation: &'static str,
        #[source]
        source: AuthError,
    },
    #[error("{operation}: transport failure")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: status {status}, body: {body}")]
    Status {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("{operation}: undecodable response (status {status}): {body}")]
    Decode {
        operation: &'static str,
        status: StatusCode,
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{operation}: malformed row: {reason}")]
    Mapping {
        operation: &'static str,
        reason: String,
    },
}
