use serde::{Deserialize, Serialize};

/// Response body of `POST /claim/request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimChallenge {
    /// Stable identifier the robot advertises about itself
    pub robot_id: String,
    /// Whether the robot will display a PIN that must be confirmed
    #[serde(default)]
    pub pin_required: bool,
}

/// Request body of `POST /claim/confirm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfirmRequest {
    pub pin: String,
}

/// Granted on a successful claim; carried as the
/// `x-control-token` / `session-id` header pair afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimGrant {
    pub robot_id: String,
    pub control_token: String,
    pub session_id: String,
}
