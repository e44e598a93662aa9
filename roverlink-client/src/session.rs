use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};

use roverlink_api::models::{
    ClaimChallenge, ClaimGrant, NetworkStatus, WifiCredentials, WifiScanResponse,
};

use crate::client::RobotClient;
use crate::configs::Settings;
use crate::discovery::{ipv4_host_of, normalize_base_url};
use crate::error::{Error, Result};
use crate::storage::{DeviceIdentity, KeyValueStore, RobotDirectory, StoredRobotRecord, keys};

/// Merged view of the robot's three status endpoints, refreshed as a unit.
#[derive(Debug, Clone, Default)]
pub struct RobotStatus {
    pub health: Option<roverlink_api::models::HealthReport>,
    pub telemetry: Option<roverlink_api::models::TelemetryReport>,
    pub network: NetworkStatus,
}

/// Snapshot of the manager's state at one point in time.
#[derive(Debug, Clone)]
pub struct ConnectionSession {
    pub base_url: String,
    pub control_token: Option<String>,
    pub session_id: Option<String>,
    pub active_robot_id: Option<String>,
    pub is_polling: bool,
    pub last_updated: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub status: Option<RobotStatus>,
}

struct SessionInner {
    session: ConnectionSession,
    client: RobotClient,
    /// Generation stamps make overlapping refreshes last-write-wins: a slow
    /// refresh that finishes after a newer one is discarded instead of
    /// resurrecting stale data or a stale error.
    refresh_gen: u64,
    committed_gen: u64,
    poll_cancel: Option<watch::Sender<bool>>,
}

/// Owns the authenticated connection to one robot: the base URL, the claim
/// artifacts, the merged status snapshot, and the unattended polling loop.
///
/// Cheap-clone handle; all clones share the same inner state.
pub struct SessionManager<S> {
    settings: Settings,
    store: Arc<S>,
    directory: RobotDirectory<S>,
    device_id: String,
    inner: Arc<RwLock<SessionInner>>,
}

impl<S> Clone for SessionManager<S> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            store: Arc::clone(&self.store),
            directory: self.directory.clone(),
            device_id: self.device_id.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeyValueStore + 'static> SessionManager<S> {
    /// Restores the persisted base URL and claim artifacts, falling back to
    /// the configured default address when nothing is stored.
    pub async fn new(settings: Settings, store: Arc<S>) -> Result<Self> {
        let device_id = DeviceIdentity::load_or_create(store.as_ref()).await?;

        let base_url = store
            .get_item(keys::BASE_URL)
            .await?
            .map(|url| normalize_base_url(&url))
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| normalize_base_url(&settings.robot.default_base_url));
        let control_token = store.get_item(keys::CONTROL_TOKEN).await?;
        let session_id = store.get_item(keys::SESSION_ID).await?;

        let mut client = RobotClient::new(
            &base_url,
            Duration::from_secs(settings.session.http_timeout_secs),
        )?;
        client.set_auth(control_token.clone(), session_id.clone());

        let inner = SessionInner {
            session: ConnectionSession {
                base_url,
                control_token,
                session_id,
                active_robot_id: None,
                is_polling: false,
                last_updated: None,
                last_error: None,
                status: None,
            },
            client,
            refresh_gen: 0,
            committed_gen: 0,
            poll_cancel: None,
        };

        Ok(Self {
            settings,
            directory: RobotDirectory::new(Arc::clone(&store)),
            store,
            device_id,
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn directory(&self) -> &RobotDirectory<S> {
        &self.directory
    }

    pub async fn session(&self) -> ConnectionSession {
        self.inner.read().await.session.clone()
    }

    /// IP the robot last reported about itself, for seeding discovery.
    pub async fn status_ip(&self) -> Option<std::net::Ipv4Addr> {
        let inner = self.inner.read().await;
        inner
            .session
            .status
            .as_ref()
            .and_then(|status| status.network.ip.as_deref())
            .and_then(|ip| ip.parse().ok())
    }

    /// Points the session at a new address. Persists immediately and clears
    /// any stale error; does not refresh on its own.
    pub async fn set_base_url(&self, url: &str) -> Result<()> {
        let normalized = normalize_base_url(url);
        if normalized.is_empty() {
            return Err(Error::InvalidInput("base url must not be empty".into()));
        }

        {
            let mut inner = self.inner.write().await;
            inner.session.base_url = normalized.clone();
            inner.session.last_error = None;
            inner.client.set_base_url(&normalized);
        }
        self.store.set_item(keys::BASE_URL, &normalized).await
    }

    /// Fetches health, telemetry and network info concurrently and commits
    /// the merged snapshot. Partial failure is fine; only when all three
    /// fail does the snapshot drop and `last_error` get set.
    pub async fn refresh_status(&self) -> Result<()> {
        let (client, generation, base_url) = {
            let mut inner = self.inner.write().await;
            inner.refresh_gen += 1;
            (
                inner.client.clone(),
                inner.refresh_gen,
                inner.session.base_url.clone(),
            )
        };

        let (health, telemetry, network_info) =
            tokio::join!(client.health(), client.telemetry(), client.network_info());

        let health = health
            .inspect_err(|error| tracing::debug!(%error, "health fetch failed"))
            .ok();
        let telemetry = telemetry
            .inspect_err(|error| tracing::debug!(%error, "telemetry fetch failed"))
            .ok();
        let network_info = network_info
            .inspect_err(|error| tracing::debug!(%error, "network info fetch failed"))
            .ok();

        let mut inner = self.inner.write().await;
        if generation <= inner.committed_gen {
            tracing::debug!(generation, "stale refresh discarded");
            return Ok(());
        }
        inner.committed_gen = generation;

        if health.is_none() && telemetry.is_none() && network_info.is_none() {
            inner.session.status = None;
            inner.session.last_error = Some(format!("robot unreachable at {base_url}"));
            return Ok(());
        }

        let network = merge_network(
            telemetry.as_ref().and_then(|t| t.network.as_ref()),
            health.as_ref().and_then(|h| h.network.as_ref()),
            network_info.as_ref(),
            &base_url,
        );
        inner.session.status = Some(RobotStatus {
            health,
            telemetry,
            network,
        });
        inner.session.last_updated = Some(OffsetDateTime::now_utc());
        inner.session.last_error = None;
        Ok(())
    }

    /// Starts the fixed-interval unattended refresh loop. Idempotent; a
    /// second call while polling is a no-op so timers never stack.
    pub async fn start_polling(&self) {
        let mut cancel_rx = {
            let mut inner = self.inner.write().await;
            if inner.session.is_polling {
                return;
            }
            let (cancel_tx, cancel_rx) = watch::channel(false);
            inner.poll_cancel = Some(cancel_tx);
            inner.session.is_polling = true;
            cancel_rx
        };

        let manager = self.clone();
        let interval = Duration::from_secs(self.settings.session.poll_interval_secs);
        tokio::spawn(async move {
            loop {
                if *cancel_rx.borrow() {
                    break;
                }
                if let Err(error) = manager.refresh_status().await {
                    tracing::warn!(%error, "unattended refresh failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("polling loop stopped");
        });
    }

    pub async fn stop_polling(&self) {
        let mut inner = self.inner.write().await;
        inner.session.is_polling = false;
        if let Some(cancel) = inner.poll_cancel.take() {
            let _ = cancel.send(true);
        }
    }

    /// Adopts a stored pairing for the robot at `url`, if one exists and
    /// was written by this installation. Returns `false` (touching nothing)
    /// when there is no usable record. The adopted claim stands even if the
    /// robot is unreachable right now.
    pub async fn connect_to_stored_robot(&self, url: &str) -> Result<bool> {
        let record = match self.directory.find(url).await? {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.device_id != self.device_id {
            tracing::warn!(
                robot_id = %record.robot_id,
                "stored pairing belongs to another installation, not reconnecting"
            );
            return Ok(false);
        }

        let base_url = normalize_base_url(&record.base_url);
        {
            let mut inner = self.inner.write().await;
            inner.session.base_url = base_url.clone();
            inner.session.control_token = Some(record.control_token.clone());
            inner.session.active_robot_id = Some(record.robot_id.clone());
            inner.session.last_error = None;
            inner.client.set_base_url(&base_url);
            let session_id = inner.session.session_id.clone();
            inner
                .client
                .set_auth(Some(record.control_token.clone()), session_id);
        }
        self.persist_connection().await?;
        self.directory
            .mark_seen(&record.robot_id, ipv4_host_of(&base_url).map(|ip| ip.to_string()))
            .await?;

        if let Err(error) = self.refresh_status().await {
            tracing::debug!(%error, "refresh after reconnect failed");
        }
        Ok(true)
    }

    pub async fn request_claim(&self) -> Result<ClaimChallenge> {
        let client = self.inner.read().await.client.clone();
        client.claim_request().await
    }

    /// Confirms the claim PIN and, on success, adopts the granted token and
    /// records the pairing under this installation's identity.
    pub async fn confirm_claim(&self, pin: &str) -> Result<ClaimGrant> {
        let client = self.inner.read().await.client.clone();
        let grant = client.claim_confirm(pin).await?;

        let base_url = {
            let mut inner = self.inner.write().await;
            inner.session.control_token = Some(grant.control_token.clone());
            inner.session.session_id = Some(grant.session_id.clone());
            inner.session.active_robot_id = Some(grant.robot_id.clone());
            inner
                .client
                .set_auth(Some(grant.control_token.clone()), Some(grant.session_id.clone()));
            inner.session.base_url.clone()
        };
        self.persist_connection().await?;

        self.directory
            .upsert(StoredRobotRecord {
                robot_id: grant.robot_id.clone(),
                base_url: base_url.clone(),
                device_id: self.device_id.clone(),
                control_token: grant.control_token.clone(),
                last_ip: ipv4_host_of(&base_url).map(|ip| ip.to_string()),
                last_seen: Some(OffsetDateTime::now_utc()),
            })
            .await?;
        Ok(grant)
    }

    /// Drops the active association and every persisted artifact, returning
    /// the session to the out-of-box default address. Directory records for
    /// other robots are left alone.
    pub async fn clear_connection(&self) -> Result<()> {
        self.stop_polling().await;

        let default_url = normalize_base_url(&self.settings.robot.default_base_url);
        {
            let mut inner = self.inner.write().await;
            inner.session = ConnectionSession {
                base_url: default_url.clone(),
                control_token: None,
                session_id: None,
                active_robot_id: None,
                is_polling: false,
                last_updated: None,
                last_error: None,
                status: None,
            };
            inner.client.set_base_url(&default_url);
            inner.client.clear_auth();
        }

        self.store.remove_item(keys::BASE_URL).await?;
        self.store.remove_item(keys::CONTROL_TOKEN).await?;
        self.store.remove_item(keys::SESSION_ID).await?;
        Ok(())
    }

    pub async fn wifi_scan(&self) -> Result<WifiScanResponse> {
        let client = self.inner.read().await.client.clone();
        client.wifi_scan().await
    }

    /// Provisions Wi-Fi over HTTP, for robots already reachable over IP.
    pub async fn provision_over_wifi(&self, ssid: &str, password: &str) -> Result<()> {
        let client = self.inner.read().await.client.clone();
        client
            .wifi_connect(&WifiCredentials::new(ssid, password))
            .await
    }

    async fn persist_connection(&self) -> Result<()> {
        let (base_url, control_token, session_id) = {
            let inner = self.inner.read().await;
            (
                inner.session.base_url.clone(),
                inner.session.control_token.clone(),
                inner.session.session_id.clone(),
            )
        };

        self.store.set_item(keys::BASE_URL, &base_url).await?;
        match control_token {
            Some(token) => self.store.set_item(keys::CONTROL_TOKEN, &token).await?,
            None => self.store.remove_item(keys::CONTROL_TOKEN).await?,
        }
        match session_id {
            Some(id) => self.store.set_item(keys::SESSION_ID, &id).await?,
            None => self.store.remove_item(keys::SESSION_ID).await?,
        }
        Ok(())
    }
}

/// Field-by-field merge, first source wins: live telemetry beats the health
/// report beats the dedicated network endpoint. A still-missing IP falls
/// back to the host of the base URL, which is known-reachable if anything
/// answered at all.
fn merge_network(
    telemetry: Option<&NetworkStatus>,
    health: Option<&NetworkStatus>,
    info: Option<&NetworkStatus>,
    base_url: &str,
) -> NetworkStatus {
    let mut merged = NetworkStatus::default();
    for source in [telemetry, health, info].into_iter().flatten() {
        if merged.ip.is_none() {
            merged.ip = source.ip.clone();
        }
        if merged.ssid.is_none() {
            merged.ssid = source.ssid.clone();
        }
        if merged.signal_dbm.is_none() {
            merged.signal_dbm = source.signal_dbm;
        }
        if merged.mode.is_none() {
            merged.mode = source.mode;
        }
    }

    if merged.ip.is_none() {
        merged.ip = ipv4_host_of(base_url).map(|ip| ip.to_string());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use roverlink_api::models::NetworkMode;

    fn unreachable_settings() -> Settings {
        let mut settings = Settings::default();
        // Connection refused resolves immediately, no timeout wait.
        settings.robot.default_base_url = "http://127.0.0.1:9".to_string();
        settings.session.http_timeout_secs = 2;
        settings
    }

    async fn manager() -> SessionManager<MemoryStore> {
        SessionManager::new(unreachable_settings(), Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[test]
    fn merge_prefers_telemetry_then_health_then_info() {
        let telemetry = NetworkStatus {
            ip: Some("10.0.0.5".into()),
            ssid: None,
            signal_dbm: None,
            mode: None,
        };
        let health = NetworkStatus {
            ip: Some("10.0.0.6".into()),
            ssid: Some("HomeNet".into()),
            signal_dbm: None,
            mode: None,
        };
        let info = NetworkStatus {
            ip: Some("10.0.0.7".into()),
            ssid: Some("OtherNet".into()),
            signal_dbm: Some(-61),
            mode: Some(NetworkMode::Station),
        };

        let merged = merge_network(
            Some(&telemetry),
            Some(&health),
            Some(&info),
            "http://10.0.0.5:8000",
        );

        assert_eq!(merged.ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(merged.ssid.as_deref(), Some("HomeNet"));
        assert_eq!(merged.signal_dbm, Some(-61));
        assert_eq!(merged.mode, Some(NetworkMode::Station));
    }

    #[test]
    fn merge_falls_back_to_the_base_url_host() {
        let merged = merge_network(None, None, None, "http://10.0.0.9:8000");
        assert_eq!(merged.ip.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn set_base_url_normalizes_persists_and_clears_the_error() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_settings(), Arc::clone(&store))
            .await
            .unwrap();

        manager.refresh_status().await.unwrap();
        assert!(manager.session().await.last_error.is_some());

        manager.set_base_url(" http://10.0.0.15:8000/ ").await.unwrap();

        let session = manager.session().await;
        assert_eq!(session.base_url, "http://10.0.0.15:8000");
        assert!(session.last_error.is_none());
        assert_eq!(
            store.get_item(keys::BASE_URL).await.unwrap().as_deref(),
            Some("http://10.0.0.15:8000")
        );
    }

    #[tokio::test]
    async fn failed_refresh_drops_the_snapshot_and_sets_the_error() {
        let manager = manager().await;

        manager.refresh_status().await.unwrap();

        let session = manager.session().await;
        assert!(session.status.is_none());
        assert!(session.last_updated.is_none());
        let error = session.last_error.unwrap();
        assert!(error.contains("127.0.0.1:9"));
    }

    #[tokio::test]
    async fn foreign_record_is_not_adopted() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_settings(), Arc::clone(&store))
            .await
            .unwrap();

        manager
            .directory()
            .upsert(StoredRobotRecord {
                robot_id: "rov-7".to_string(),
                base_url: "http://10.0.0.15:8000".to_string(),
                device_id: "someone-elses-install".to_string(),
                control_token: "their-token".to_string(),
                last_ip: Some("10.0.0.15".to_string()),
                last_seen: None,
            })
            .await
            .unwrap();

        let before = manager.session().await;
        let adopted = manager
            .connect_to_stored_robot("http://10.0.0.15:8000")
            .await
            .unwrap();

        assert!(!adopted);
        let after = manager.session().await;
        assert_eq!(after.base_url, before.base_url);
        assert!(after.control_token.is_none());
        assert!(after.active_robot_id.is_none());
        assert!(store.get_item(keys::CONTROL_TOKEN).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn own_record_is_adopted_even_when_unreachable() {
        let store = Arc::new(MemoryStore::new());
        let manager = SessionManager::new(unreachable_settings(), Arc::clone(&store))
            .await
            .unwrap();

        manager
            .directory()
            .upsert(StoredRobotRecord {
                robot_id: "rov-7".to_string(),
                // Closed port, the adoption must survive the failed refresh.
                base_url: "http://127.0.0.1:9".to_string(),
                device_id: manager.device_id().to_string(),
                control_token: "my-token".to_string(),
                last_ip: Some("127.0.0.1".to_string()),
                last_seen: None,
            })
            .await
            .unwrap();

        let adopted = manager
            .connect_to_stored_robot("http://127.0.0.1:9")
            .await
            .unwrap();

        assert!(adopted);
        let session = manager.session().await;
        assert_eq!(session.control_token.as_deref(), Some("my-token"));
        assert_eq!(session.active_robot_id.as_deref(), Some("rov-7"));
        assert_eq!(
            store.get_item(keys::CONTROL_TOKEN).await.unwrap().as_deref(),
            Some("my-token")
        );

        let record = manager
            .directory()
            .find("http://127.0.0.1:9")
            .await
            .unwrap()
            .unwrap();
        assert!(record.last_seen.is_some());
    }

    #[tokio::test]
    async fn clear_connection_returns_to_the_out_of_box_state() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_item(keys::BASE_URL, "http://10.0.0.15:8000")
            .await
            .unwrap();
        store.set_item(keys::CONTROL_TOKEN, "tok").await.unwrap();
        store.set_item(keys::SESSION_ID, "sess").await.unwrap();

        let manager = SessionManager::new(unreachable_settings(), Arc::clone(&store))
            .await
            .unwrap();
        assert_eq!(manager.session().await.base_url, "http://10.0.0.15:8000");

        manager.clear_connection().await.unwrap();

        let session = manager.session().await;
        assert_eq!(session.base_url, "http://127.0.0.1:9");
        assert!(session.control_token.is_none());
        assert!(session.session_id.is_none());
        assert!(session.status.is_none());
        assert!(!session.is_polling);
        assert!(store.get_item(keys::BASE_URL).await.unwrap().is_none());
        assert!(store.get_item(keys::CONTROL_TOKEN).await.unwrap().is_none());
        assert!(store.get_item(keys::SESSION_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn polling_start_is_idempotent_and_stop_ends_it() {
        let manager = manager().await;

        manager.start_polling().await;
        manager.start_polling().await;
        assert!(manager.session().await.is_polling);

        manager.stop_polling().await;
        assert!(!manager.session().await.is_polling);
    }
}
