use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Radio scan permission denied by the host")]
    PermissionDenied,

    #[error("Radio adapter unavailable: {reason}")]
    AdapterUnavailable { reason: String },

    /// The device does not expose the provisioning service. Firmware/app
    /// mismatch; never retried.
    #[error("Provisioning service {0} not found on device")]
    ServiceNotFound(Uuid),

    /// The provisioning service is present but misses an expected
    /// characteristic. Firmware/app mismatch; never retried.
    #[error("Characteristic {0} not found on device")]
    CharacteristicNotFound(Uuid),

    #[error("No active radio connection")]
    NotConnected,

    #[error("Claim rejected: {0}")]
    AuthRejected(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage(message.into())
    }

    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedResponse(message.into())
    }

    /// Fatal provisioning errors indicate a firmware/app mismatch and must
    /// not be retried by callers.
    pub fn is_fatal_provisioning(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound(_) | Self::CharacteristicNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
