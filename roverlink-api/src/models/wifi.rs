use serde::{Deserialize, Serialize};

/// Credentials handed to the robot, over radio or `POST /wifi/connect`.
///
/// Held only for the duration of one configuration exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    /// Empty for open networks
    #[serde(default)]
    pub password: String,
}

impl WifiCredentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// An SSID must be present; the password may legitimately be empty.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ssid.trim().is_empty() {
            return Err("ssid must not be empty");
        }
        Ok(())
    }
}

/// One network seen by the robot's own scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    #[serde(default)]
    pub signal_dbm: Option<i8>,
    #[serde(default)]
    pub security: Option<String>,
}

/// Response body of `GET /wifi/scan` (or `/wifi/networks`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WifiScanResponse {
    #[serde(default)]
    pub networks: Vec<WifiNetwork>,
}
