use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Radio/IP mode the robot reports itself in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Joined to an infrastructure network
    Station,
    /// Serving its own access point
    Hotspot,
    #[serde(other)]
    Unknown,
}

/// Network block embedded in health and telemetry payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// IPv4 address on the current network, dotted quad
    #[serde(default)]
    pub ip: Option<String>,
    /// SSID the robot is joined to (absent in hotspot mode)
    #[serde(default)]
    pub ssid: Option<String>,
    /// Received signal strength
    #[serde(default)]
    pub signal_dbm: Option<i8>,
    #[serde(default)]
    pub mode: Option<NetworkMode>,
}

impl NetworkStatus {
    pub fn has_ip(&self) -> bool {
        self.ip.as_deref().is_some_and(|ip| !ip.is_empty())
    }
}

/// Response body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Liveness literal, normally "ok"
    pub status: String,
    /// Firmware version string
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uptime_secs: Option<u64>,
    #[serde(default)]
    pub network: Option<NetworkStatus>,
}

/// Response body of `GET /status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryReport {
    #[serde(default)]
    pub battery_percent: Option<f32>,
    #[serde(default)]
    pub charging: Option<bool>,
    #[serde(default)]
    pub cpu_temp_c: Option<f32>,
    #[serde(default)]
    pub network: Option<NetworkStatus>,
    /// Robot-side sample time, when the firmware reports one
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reported_at: Option<OffsetDateTime>,
    /// Firmware-specific fields we carry through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_health_payload_decodes() {
        let report: HealthReport = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();

        assert_eq!(report.status, "ok");
        assert!(report.network.is_none());
    }

    #[test]
    fn unknown_network_mode_is_lossless() {
        let status: NetworkStatus =
            serde_json::from_str(r#"{"ip":"10.0.0.7","mode":"mesh"}"#).unwrap();

        assert_eq!(status.mode, Some(NetworkMode::Unknown));
        assert!(status.has_ip());
    }

    #[test]
    fn telemetry_keeps_unmodelled_fields() {
        let report: TelemetryReport =
            serde_json::from_str(r#"{"battery_percent":87.5,"lidar_rpm":600}"#).unwrap();

        assert_eq!(report.battery_percent, Some(87.5));
        assert_eq!(report.extra.get("lidar_rpm"), Some(&serde_json::json!(600)));
    }
}
