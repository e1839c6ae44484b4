//! Bemfa cloud API client.
//!
//! Two remote operations: fetch the full device-list snapshot, and post a
//! single command string to one topic. One attempt per call; retry policy
//! belongs to the poll timer, which just fires again.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::device::DeviceRecord;

/// Production endpoints. Overridable for tests via [`BemfaClient::with_endpoints`].
const FETCH_BASE: &str = "https://pro.bemfa.com/v4/app/v1";
const COMMAND_BASE: &str = "https://pro.bemfa.com/vv";

/// The cloud rejects requests without a client User-Agent; this is the one
/// the vendor's own app sends.
const USER_AGENT: &str = "Dart/3.7 (dart:io)";

/// The single failure signal for a fetch: transport error, non-2xx status,
/// or a non-zero API code all collapse into this.
#[derive(Debug, Error)]
#[error("update failed: {0}")]
pub struct UpdateFailed(pub String);

/// JSON envelope around every fetch response.
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    data: Option<Vec<DeviceRecord>>,
    #[serde(default)]
    msg: Option<String>,
}

/// HTTP client for one Bemfa account.
pub struct BemfaClient {
    client: reqwest::Client,
    user: String,
    fetch_base: String,
    command_base: String,
}

impl BemfaClient {
    /// Create a client with a 5-second request timeout.
    pub fn new(user: &str) -> Self {
        Self::with_endpoints(user, FETCH_BASE, COMMAND_BASE)
    }

    pub fn with_endpoints(user: &str, fetch_base: &str, command_base: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            user: user.to_string(),
            fetch_base: fetch_base.trim_end_matches('/').to_string(),
            command_base: command_base.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the full device list for this account.
    ///
    /// An empty list is a valid snapshot; any failure is an [`UpdateFailed`].
    pub async fn fetch_devices(&self) -> Result<Vec<DeviceRecord>, UpdateFailed> {
        let url = format!("{}/homeRoom?user={}", self.fetch_base, self.user);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdateFailed(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(UpdateFailed(format!("HTTP {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| UpdateFailed(format!("failed to read response: {e}")))?;

        let devices = parse_envelope(&body)?;
        tracing::debug!(count = devices.len(), "fetched device snapshot");
        Ok(devices)
    }

    /// Post one command string to one topic. Best-effort: every failure
    /// path is swallowed into `false`, and nothing propagates to the caller.
    pub async fn send_command(&self, topic: &str, msg: &str) -> bool {
        let url = format!("{}/postmsg2", self.command_base);
        // The remote expects the raw token string, '#' delimiters included,
        // with no percent-encoding.
        let body = format!("user={}&topic={}&msg={}&type=3", self.user, topic, msg);

        tracing::debug!(topic = %topic, msg = %msg, "sending command");

        match self
            .client
            .post(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=utf-8",
            )
            .body(body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::error!(topic = %topic, status = %resp.status(), "command rejected");
                false
            }
            Err(e) => {
                tracing::error!(topic = %topic, "command failed: {}", e);
                false
            }
        }
    }
}

/// Parse the `{code, data, msg}` envelope. `code != 0` is a failure even
/// when the transport succeeded.
fn parse_envelope(body: &str) -> Result<Vec<DeviceRecord>, UpdateFailed> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| UpdateFailed(format!("invalid response: {e}")))?;

    if envelope.code != 0 {
        return Err(UpdateFailed(format!(
            "API error {}: {}",
            envelope.code,
            envelope.msg.unwrap_or_default()
        )));
    }

    Ok(envelope.data.unwrap_or_default())
}
