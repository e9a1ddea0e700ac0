use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::command_envelope;

/// Access tokens are refreshed this long before their reported expiry.
const TOKEN_EXPIRY_MARGIN_SECS: u64 = 1800;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Thin wrapper over the Que cloud REST endpoints. Holds the refresh token
/// and a cached access token shared by all callers.
pub(crate) struct QueApi {
    http: reqwest::Client,
    base_url: String,
    channel_url: String,
    serial: String,
    refresh_token: String,
    cached_token: Mutex<Option<CachedToken>>,
}

impl QueApi {
    pub fn new(
        base_url: String,
        channel_url: String,
        serial: String,
        refresh_token: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            channel_url,
            serial,
            refresh_token,
            cached_token: Mutex::new(None),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn channel_url(&self) -> &str {
        &self.channel_url
    }

    /// Exchange the refresh token for an access token, or reuse the cached
    /// one while it has comfortable lifetime left.
    pub async fn get_token(&self) -> Result<String> {
        let mut cached = self.cached_token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        debug!("refreshing access token");
        let response = self
            .http
            .post(format!("{}/api/v0/oauth/token", self.base_url))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", self.refresh_token.as_str()),
                ("client_id", "app"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response.json().await?;

        let lifetime = token
            .expires_in
            .saturating_sub(TOKEN_EXPIRY_MARGIN_SECS)
            .max(60);
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        });
        Ok(access_token)
    }

    /// Fetch the latest full status document for the unit.
    pub async fn fetch_snapshot(&self) -> Result<Value> {
        let token = self.get_token().await?;
        let url = format!(
            "{}/api/v0/client/ac-systems/status/latest?serial={}",
            self.base_url, self.serial
        );
        debug!(url = %url, "fetching status snapshot");
        let body: Value = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.get("lastKnownState")
            .cloned()
            .ok_or_else(|| Error::MalformedSnapshot("response missing lastKnownState".to_string()))
    }

    pub async fn send_command(&self, data: Value) -> Result<()> {
        let token = self.get_token().await?;
        let url = format!(
            "{}/api/v0/client/ac-systems/cmds/send?serial={}",
            self.base_url, self.serial
        );
        debug!(url = %url, "sending command");
        self.http
            .post(&url)
            .bearer_auth(&token)
            .json(&command_envelope(data))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// SignalR negotiate handshake. Returns the URL-encoded connection
    /// token and the protocol version to echo back on connect.
    pub async fn negotiate(&self) -> Result<(String, String)> {
        let token = self.get_token().await?;
        let url = format!("{}/api/v0/messaging/app/negotiate", self.base_url);
        let body: Value = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let connection_token = body
            .get("ConnectionToken")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Channel("negotiate response missing ConnectionToken".to_string()))?;
        let protocol_version = match body.get("ProtocolVersion") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "1.5".to_string(),
        };

        let encoded: String =
            url::form_urlencoded::byte_serialize(connection_token.as_bytes()).collect();
        Ok((encoded, protocol_version))
    }
}
