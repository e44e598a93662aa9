pub mod link;

pub use link::*;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::Result;

/// Wi-Fi provisioning GATT service advertised by the robot.
pub const PROVISIONING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0xa9f7_0001_5a2d_4796_9f3a_3c4b_de0a_1dc2);

/// Write characteristic: base64-encoded `{ssid,password}` JSON.
pub const CONFIG_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xa9f7_0002_5a2d_4796_9f3a_3c4b_de0a_1dc2);

/// Read/notify characteristic: one of `idle|connecting|connected|failed`.
pub const STATUS_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xa9f7_0003_5a2d_4796_9f3a_3c4b_de0a_1dc2);

/// A device seen during a radio scan. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioDevice {
    pub id: String,
    pub display_name: Option<String>,
    pub signal_dbm: Option<i8>,
}

/// Whether the radio stack exists on this build/host, resolved once at
/// startup. Every radio operation short-circuits to a typed error when
/// unavailable instead of probing for modules at call time.
#[derive(Debug, Clone)]
pub enum RadioSupport {
    Available,
    Unavailable { reason: String },
}

impl RadioSupport {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Host permissions a scan or connection may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    Location,
}

/// Live scan owned by the caller: yields raw advertisements until the
/// adapter's timeout elapses or `stop` is called.
pub struct ScanHandle {
    events: mpsc::Receiver<RadioDevice>,
    stop: Option<oneshot::Sender<()>>,
}

impl ScanHandle {
    pub fn new(events: mpsc::Receiver<RadioDevice>, stop: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop: Some(stop),
        }
    }

    /// Next advertisement; `None` once the scan has terminated.
    pub async fn next_event(&mut self) -> Option<RadioDevice> {
        self.events.recv().await
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Opaque handle to a characteristic within an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicHandle(pub u16);

/// Platform radio stack. One implementation per target OS; tests provide
/// scripted mocks.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    fn support(&self) -> RadioSupport;

    fn required_permissions(&self) -> &[Permission];

    /// Asks the host to grant `permissions`; `false` means denied.
    async fn request_permissions(&self, permissions: &[Permission]) -> Result<bool>;

    /// Starts an advertisement scan that self-terminates after `timeout`.
    async fn scan(&self, timeout: Duration) -> Result<ScanHandle>;

    async fn connect(&self, device_id: &str) -> Result<Box<dyn RadioConnection>>;
}

/// One open radio connection.
///
/// `find_characteristic` must report a missing service as
/// `Error::ServiceNotFound` and a present service lacking the requested
/// characteristic as `Error::CharacteristicNotFound`.
#[async_trait]
pub trait RadioConnection: Send {
    async fn find_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle>;

    async fn read(&mut self, characteristic: CharacteristicHandle) -> Result<Vec<u8>>;

    /// Write requiring acknowledgment from the device.
    async fn write_with_ack(
        &mut self,
        characteristic: CharacteristicHandle,
        value: &[u8],
    ) -> Result<()>;

    /// Subscribes to value-change notifications. The channel closes when
    /// the connection drops.
    async fn subscribe(
        &mut self,
        characteristic: CharacteristicHandle,
    ) -> Result<mpsc::Receiver<Vec<u8>>>;

    async fn close(&mut self) -> Result<()>;
}
