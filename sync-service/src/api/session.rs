use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::error::AuthError;

/// A token expiring this close to now is treated as already expired, so a
/// soon-to-be-rejected token is never put on the wire.
const EXPIRY_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct Session {
    token: String,
    valid_until: OffsetDateTime,
}

impl Session {
    /// Initial state: forces a refresh on first use.
    fn expired() -> Self {
        Self {
            token: String::new(),
            valid_until: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn usable_at(&self, now: OffsetDateTime) -> bool {
        !self.token.is_empty() && now + EXPIRY_SLACK < self.valid_until
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    access_token: String,
    valid_until: EpochMillis,
}

/// Extended-JSON date as the API returns it: `{"$date": <epoch-ms>}`.
#[derive(Deserialize)]
struct EpochMillis {
    #[serde(rename = "$date")]
    epoch_ms: i64,
}

/// Owns the single bearer-token session against the metering API and
/// refreshes it lazily. Refresh-and-read is serialized behind a mutex so
/// concurrent callers never double-refresh or observe a half-updated token.
pub struct SessionManager {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    session: Mutex<Session>,
}

impl SessionManager {
    pub fn new(http: Client, base_url: &str, username: &str, password: &str) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            session: Mutex::new(Session::expired()),
        }
    }

    /// The current token, refreshed first if it expires within the slack.
    /// An error means the caller's request cannot proceed; the stale token
    /// is never handed out.
    pub async fn bearer_token(&self) -> Result<String, AuthError> {
        let mut session = self.session.lock().await;
        if !session.usable_at(OffsetDateTime::now_utc()) {
            *session = self.refresh().await?;
        }
        Ok(session.token.clone())
    }

    async fn refresh(&self) -> Result<Session, AuthError> {
        let resp = self
            .http
            .post(format!("{}v1/auth", self.base_url))
            .json(&serde_json::json!({
                "username": self.username,
                "password": self.password,
            }))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected { status, body });
        }

        let parsed: AuthResponse = serde_json::from_str(&body).map_err(AuthError::Decode)?;
        let valid_until = OffsetDateTime::from_unix_timestamp_nanos(
            i128::from(parsed.valid_until.epoch_ms) * 1_000_000,
        )
        .map_err(|_| AuthError::InvalidExpiry {
            epoch_ms: parsed.valid_until.epoch_ms,
        })?;

        metrics::counter!("token_refresh_total").increment(1);
        tracing::debug!(valid_until = %valid_until, "refreshed bearer token");

        Ok(Session {
            token: parsed.access_token,
            valid_until,
        })
    }
}
