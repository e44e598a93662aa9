use serde::{Deserialize, Serialize};

/// Value of the provisioning status characteristic, one of the literal
/// wire strings `idle | connecting | connected | failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed,
}

impl ProvisioningStatus {
    /// Parses a characteristic value case-insensitively.
    ///
    /// Anything the firmware sends outside the four known literals maps to
    /// `Idle` rather than an error, matching what deployed firmware relies
    /// on. Callers that care about mismatched firmware should compare the
    /// input against `as_str()` and log.
    pub fn parse_lossy(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsing_is_case_insensitive() {
        for input in ["Connected", "CONNECTED", "connected", " connected "] {
            assert_eq!(
                ProvisioningStatus::parse_lossy(input),
                ProvisioningStatus::Connected
            );
        }
    }

    #[test]
    fn unrecognized_values_collapse_to_idle() {
        for input in ["", "rebooting", "CONNECT", "0x02", "error"] {
            assert_eq!(
                ProvisioningStatus::parse_lossy(input),
                ProvisioningStatus::Idle
            );
        }
    }

    #[test]
    fn wire_form_round_trips() {
        for status in [
            ProvisioningStatus::Idle,
            ProvisioningStatus::Connecting,
            ProvisioningStatus::Connected,
            ProvisioningStatus::Failed,
        ] {
            assert_eq!(ProvisioningStatus::parse_lossy(status.as_str()), status);
        }
    }
}
