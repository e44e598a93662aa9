mod directory;
mod file;
mod identity;
mod memory;

pub use directory::*;
pub use file::*;
pub use identity::*;
pub use memory::*;

use async_trait::async_trait;

use crate::error::Result;

/// Fixed storage keys. Each is readable and writable independently so
/// losing one does not corrupt the others.
pub mod keys {
    pub const ROBOT_DIRECTORY: &str = "robot.directory";
    pub const BASE_URL: &str = "session.base_url";
    pub const CONTROL_TOKEN: &str = "session.control_token";
    pub const SESSION_ID: &str = "session.session_id";
    pub const DEVICE_IDENTITY: &str = "device.identity";
}

/// String key/value persistence behind the connectivity subsystem.
///
/// Implementations take `&self` and are expected to be shared through an
/// `Arc`; interior locking is the implementor's concern.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    async fn remove_item(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
