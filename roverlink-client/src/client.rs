use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;

use roverlink_api::models::{
    ClaimChallenge, ClaimConfirmRequest, ClaimGrant, HealthReport, NetworkStatus, TelemetryReport,
    WifiCredentials, WifiScanResponse,
};

use crate::discovery::normalize_base_url;
use crate::error::{Error, Result};

/// Thin wrapper over the robot's HTTP API.
///
/// Cheap to clone; the authenticated header pair rides along once a claim
/// has been granted.
#[derive(Debug, Clone)]
pub struct RobotClient {
    http: reqwest::Client,
    base_url: String,
    control_token: Option<String>,
    session_id: Option<String>,
}

impl RobotClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_http(http, base_url))
    }

    pub fn with_http(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: normalize_base_url(base_url),
            control_token: None,
            session_id: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_base_url(&mut self, url: &str) {
        self.base_url = normalize_base_url(url);
    }

    pub fn set_auth(&mut self, control_token: Option<String>, session_id: Option<String>) {
        self.control_token = control_token;
        self.session_id = session_id;
    }

    pub fn clear_auth(&mut self) {
        self.control_token = None;
        self.session_id = None;
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.control_token {
            builder = builder.header("x-control-token", token);
        }
        if let Some(id) = &self.session_id {
            builder = builder.header("session-id", id);
        }
        builder
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await?
            .error_for_status()?;

        response
            .json::<T>()
            .await
            .map_err(|e| Error::malformed(format!("{path}: {e}")))
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.get_json("/health").await
    }

    pub async fn telemetry(&self) -> Result<TelemetryReport> {
        self.get_json("/status").await
    }

    /// Older firmware serves `/wifi/status` instead of `/network-info`; the
    /// first error is kept when both paths fail.
    pub async fn network_info(&self) -> Result<NetworkStatus> {
        match self.get_json("/network-info").await {
            Ok(status) => Ok(status),
            Err(first) => match self.get_json("/wifi/status").await {
                Ok(status) => Ok(status),
                Err(_) => Err(first),
            },
        }
    }

    pub async fn wifi_scan(&self) -> Result<WifiScanResponse> {
        match self.get_json("/wifi/scan").await {
            Ok(scan) => Ok(scan),
            Err(first) => match self.get_json("/wifi/networks").await {
                Ok(scan) => Ok(scan),
                Err(_) => Err(first),
            },
        }
    }

    /// HTTP twin of the radio provisioning path, for robots already
    /// reachable over IP.
    pub async fn wifi_connect(&self, credentials: &WifiCredentials) -> Result<()> {
        credentials
            .validate()
            .map_err(|reason| Error::InvalidInput(reason.to_string()))?;

        self.request(Method::POST, "/wifi/connect")
            .json(credentials)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn claim_request(&self) -> Result<ClaimChallenge> {
        let response = self
            .request(Method::POST, "/claim/request")
            .send()
            .await?
            .error_for_status()?;

        response
            .json()
            .await
            .map_err(|e| Error::malformed(format!("/claim/request: {e}")))
    }

    /// A rejected PIN surfaces as `AuthRejected` with whatever message the
    /// robot returned; the caller owns the user-facing prompt.
    pub async fn claim_confirm(&self, pin: &str) -> Result<ClaimGrant> {
        let response = self
            .request(Method::POST, "/claim/confirm")
            .json(&ClaimConfirmRequest {
                pin: pin.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.to_string()
            } else {
                body.trim().to_string()
            };
            return Err(Error::AuthRejected(message));
        }

        response
            .json()
            .await
            .map_err(|e| Error::malformed(format!("/claim/confirm: {e}")))
    }
}
