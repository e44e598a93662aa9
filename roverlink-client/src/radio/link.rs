use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use roverlink_api::models::{ProvisioningStatus, WifiCredentials};

use crate::error::{Error, Result};

use super::{
    CONFIG_CHARACTERISTIC_UUID, CharacteristicHandle, PROVISIONING_SERVICE_UUID, RadioAdapter,
    RadioConnection, RadioDevice, RadioSupport, STATUS_CHARACTERISTIC_UUID,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Configuring,
    Failed,
}

/// Radio-side pairing state. Exists only while a pairing attempt is live;
/// destroyed on disconnect.
#[derive(Debug, Clone, Default)]
pub struct ProvisioningSession {
    pub state: LinkState,
    pub connected_device: Option<String>,
    pub last_status: ProvisioningStatus,
}

/// Drives a single short-range radio connection to one robot: scan,
/// connect, hand over Wi-Fi credentials, observe the robot's join attempt
/// through status notifications.
pub struct ProvisioningLink<A: RadioAdapter> {
    adapter: A,
    device_name_prefix: String,
    session: ProvisioningSession,
    connection: Option<Box<dyn RadioConnection>>,
    config_char: Option<CharacteristicHandle>,
    status_char: Option<CharacteristicHandle>,
    status_tx: watch::Sender<ProvisioningStatus>,
    status_rx: watch::Receiver<ProvisioningStatus>,
    notify_task: Option<JoinHandle<()>>,
}

impl<A: RadioAdapter> ProvisioningLink<A> {
    pub fn new(adapter: A, device_name_prefix: impl Into<String>) -> Self {
        let (status_tx, status_rx) = watch::channel(ProvisioningStatus::Idle);
        Self {
            adapter,
            device_name_prefix: device_name_prefix.into(),
            session: ProvisioningSession::default(),
            connection: None,
            config_char: None,
            status_char: None,
            status_tx,
            status_rx,
            notify_task: None,
        }
    }

    /// Current pairing state, with the latest observed robot status folded
    /// in.
    pub fn session(&mut self) -> &ProvisioningSession {
        let status = *self.status_rx.borrow();
        self.session.last_status = status;
        if status == ProvisioningStatus::Failed
            && matches!(self.session.state, LinkState::Connected | LinkState::Configuring)
        {
            self.session.state = LinkState::Failed;
        }
        &self.session
    }

    /// Live view of the robot's provisioning status for UI binding.
    ///
    /// The returned receiver starts with the current value marked as seen,
    /// so `changed()` only resolves on a subsequent notification.
    pub fn status_watch(&self) -> watch::Receiver<ProvisioningStatus> {
        self.status_tx.subscribe()
    }

    fn ensure_available(&self) -> Result<()> {
        match self.adapter.support() {
            RadioSupport::Available => Ok(()),
            RadioSupport::Unavailable { reason } => Err(Error::AdapterUnavailable { reason }),
        }
    }

    /// Scans for robots until `timeout` elapses.
    ///
    /// Advertisements are filtered to the configured name prefix and
    /// deduplicated by id; each device is handed to `on_device` exactly
    /// once, while repeat advertisements only refresh the stored signal
    /// value (latest wins). Resolves with the accumulated list.
    pub async fn scan(
        &mut self,
        timeout: Duration,
        mut on_device: Option<&mut (dyn FnMut(&RadioDevice) + Send)>,
    ) -> Result<Vec<RadioDevice>> {
        self.ensure_available()?;

        let required = self.adapter.required_permissions().to_vec();
        if !self.adapter.request_permissions(&required).await? {
            return Err(Error::PermissionDenied);
        }

        self.session.state = LinkState::Scanning;
        let mut handle = match self.adapter.scan(timeout).await {
            Ok(handle) => handle,
            Err(error) => {
                self.session.state = LinkState::Idle;
                return Err(error);
            }
        };

        let mut found: Vec<RadioDevice> = Vec::new();
        while let Some(device) = handle.next_event().await {
            let named = device
                .display_name
                .as_deref()
                .is_some_and(|name| name.starts_with(&self.device_name_prefix));
            if !named {
                continue;
            }

            match found.iter_mut().find(|known| known.id == device.id) {
                Some(known) => {
                    if device.signal_dbm.is_some() {
                        known.signal_dbm = device.signal_dbm;
                    }
                }
                None => {
                    if let Some(callback) = on_device.as_mut() {
                        callback(&device);
                    }
                    found.push(device);
                }
            }
        }

        self.session.state = LinkState::Idle;
        tracing::debug!(count = found.len(), "radio scan finished");
        Ok(found)
    }

    /// Connects and wires up the provisioning service.
    ///
    /// A missing service or characteristic means the firmware and this app
    /// disagree about the contract; that is fatal and not retried. On
    /// success the status characteristic is read once to seed the current
    /// state and subscribed for changes.
    pub async fn connect(&mut self, device_id: &str) -> Result<()> {
        self.ensure_available()?;
        if self.connection.is_some() {
            self.disconnect().await?;
        }

        self.session.state = LinkState::Connecting;
        let mut connection = match self.adapter.connect(device_id).await {
            Ok(connection) => connection,
            Err(error) => {
                self.session.state = LinkState::Failed;
                return Err(error);
            }
        };

        let wired = Self::wire_provisioning_service(&mut connection).await;
        let (config_char, status_char, seed, notifications) = match wired {
            Ok(parts) => parts,
            Err(error) => {
                let _ = connection.close().await;
                self.session.state = LinkState::Failed;
                return Err(error);
            }
        };

        let status = parse_status_value(&seed);
        self.status_tx.send_replace(status);

        let forward = self.status_tx.clone();
        self.notify_task = Some(tokio::spawn(async move {
            let mut notifications = notifications;
            while let Some(value) = notifications.recv().await {
                let status = parse_status_value(&value);
                tracing::debug!(status = status.as_str(), "provisioning status notification");
                forward.send_replace(status);
            }
        }));

        self.connection = Some(connection);
        self.config_char = Some(config_char);
        self.status_char = Some(status_char);
        self.session.state = LinkState::Connected;
        self.session.connected_device = Some(device_id.to_string());
        self.session.last_status = status;
        Ok(())
    }

    async fn wire_provisioning_service(
        connection: &mut Box<dyn RadioConnection>,
    ) -> Result<(
        CharacteristicHandle,
        CharacteristicHandle,
        Vec<u8>,
        tokio::sync::mpsc::Receiver<Vec<u8>>,
    )> {
        let config_char = connection
            .find_characteristic(PROVISIONING_SERVICE_UUID, CONFIG_CHARACTERISTIC_UUID)
            .await?;
        let status_char = connection
            .find_characteristic(PROVISIONING_SERVICE_UUID, STATUS_CHARACTERISTIC_UUID)
            .await?;

        let seed = connection.read(status_char).await?;
        let notifications = connection.subscribe(status_char).await?;
        Ok((config_char, status_char, seed, notifications))
    }

    /// Hands the robot its Wi-Fi credentials as an acknowledged write.
    ///
    /// Does not wait for the robot to join the network; that outcome
    /// arrives asynchronously through the status notifications.
    pub async fn send_config(&mut self, ssid: &str, password: &str) -> Result<()> {
        let credentials = WifiCredentials::new(ssid, password);
        credentials
            .validate()
            .map_err(|reason| Error::InvalidInput(reason.to_string()))?;

        let (connection, config_char) = match (self.connection.as_mut(), self.config_char) {
            (Some(connection), Some(config_char)) => (connection, config_char),
            _ => return Err(Error::NotConnected),
        };

        self.session.state = LinkState::Configuring;
        let payload = serde_json::to_vec(&credentials)?;
        let encoded = BASE64.encode(payload);

        match connection.write_with_ack(config_char, encoded.as_bytes()).await {
            Ok(()) => {
                tracing::info!(ssid, "credentials written to robot");
                self.session.state = LinkState::Connected;
                Ok(())
            }
            Err(error) => {
                self.session.state = LinkState::Failed;
                Err(error)
            }
        }
    }

    /// Tears the connection down. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(mut connection) = self.connection.take() {
            if let Err(error) = connection.close().await {
                tracing::debug!(%error, "radio close failed during disconnect");
            }
        }
        self.config_char = None;
        self.status_char = None;
        self.session = ProvisioningSession::default();
        self.status_tx.send_replace(ProvisioningStatus::Idle);
        Ok(())
    }
}

fn decode_status_text(raw: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(raw) {
        let trimmed = text.trim();
        let lowered = trimmed.to_ascii_lowercase();
        if matches!(lowered.as_str(), "idle" | "connecting" | "connected" | "failed") {
            return trimmed.to_string();
        }
        if let Ok(decoded) = BASE64.decode(trimmed) {
            if let Ok(inner) = String::from_utf8(decoded) {
                return inner;
            }
        }
        return trimmed.to_string();
    }
    String::from_utf8_lossy(raw).into_owned()
}

fn parse_status_value(raw: &[u8]) -> ProvisioningStatus {
    let text = decode_status_text(raw);
    let status = ProvisioningStatus::parse_lossy(&text);
    if status == ProvisioningStatus::Idle && !text.trim().eq_ignore_ascii_case("idle") {
        tracing::warn!(value = %text.trim(), "unrecognized provisioning status, treating as idle");
    }
    status
}
