use uuid::Uuid;

use crate::error::Result;

use super::{KeyValueStore, keys};

/// Stable per-installation identifier, generated once and persisted.
///
/// Stored robot records carry this value; records written by a different
/// installation are never trusted for silent reconnection.
pub struct DeviceIdentity;

impl DeviceIdentity {
    pub async fn load_or_create<S: KeyValueStore>(store: &S) -> Result<String> {
        if let Some(id) = store.get_item(keys::DEVICE_IDENTITY).await? {
            if !id.trim().is_empty() {
                return Ok(id);
            }
        }

        let id = Uuid::new_v4().to_string();
        store.set_item(keys::DEVICE_IDENTITY, &id).await?;
        tracing::debug!(%id, "generated new device identity");
        Ok(id)
    }
}
