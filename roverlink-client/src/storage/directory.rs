use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::discovery::{ipv4_host_of, normalize_base_url};
use crate::error::Result;

use super::{KeyValueStore, keys};

/// Durable directory entry for a previously paired robot.
///
/// A record is only trusted for auto-reconnect when its `device_id` matches
/// the current installation's identity; this keeps a reinstalled app (or a
/// different handheld) from inheriting someone else's control token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRobotRecord {
    pub robot_id: String,
    pub base_url: String,
    /// Identity of the installation that claimed this robot
    pub device_id: String,
    pub control_token: String,
    #[serde(default)]
    pub last_ip: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

/// The list of paired robots, stored as one JSON value under a single key.
pub struct RobotDirectory<S> {
    store: Arc<S>,
}

impl<S: KeyValueStore> RobotDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Loads all records. An absent key is an empty directory; an
    /// undecodable one is logged and treated the same so a bad write never
    /// locks the user out of pairing again.
    pub async fn load(&self) -> Result<Vec<StoredRobotRecord>> {
        let raw = match self.store.get_item(keys::ROBOT_DIRECTORY).await? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };

        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(error) => {
                tracing::warn!(%error, "robot directory is unreadable, starting empty");
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, records: &[StoredRobotRecord]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set_item(keys::ROBOT_DIRECTORY, &raw).await
    }

    /// Looks a record up by exact (normalized) URL, or failing that by the
    /// bare IP of the URL's host against `last_ip`.
    pub async fn find(&self, url: &str) -> Result<Option<StoredRobotRecord>> {
        let records = self.load().await?;
        let wanted = normalize_base_url(url);

        if let Some(record) = records
            .iter()
            .find(|r| normalize_base_url(&r.base_url) == wanted)
        {
            return Ok(Some(record.clone()));
        }

        let wanted_ip = ipv4_host_of(url).map(|ip| ip.to_string());
        Ok(records
            .iter()
            .find(|r| r.last_ip.is_some() && r.last_ip == wanted_ip)
            .cloned())
    }

    /// Inserts or replaces the record for `record.robot_id`.
    pub async fn upsert(&self, record: StoredRobotRecord) -> Result<()> {
        let mut records = self.load().await?;

        match records.iter_mut().find(|r| r.robot_id == record.robot_id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        self.save(&records).await
    }

    /// Stamps `last_seen` (and optionally `last_ip`) on a known robot.
    pub async fn mark_seen(&self, robot_id: &str, ip: Option<String>) -> Result<()> {
        let mut records = self.load().await?;

        if let Some(record) = records.iter_mut().find(|r| r.robot_id == robot_id) {
            record.last_seen = Some(OffsetDateTime::now_utc());
            if ip.is_some() {
                record.last_ip = ip;
            }
            self.save(&records).await?;
        }

        Ok(())
    }

    pub async fn remove(&self, robot_id: &str) -> Result<()> {
        let mut records = self.load().await?;
        records.retain(|r| r.robot_id != robot_id);
        self.save(&records).await
    }
}

impl<S> Clone for RobotDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn record(robot_id: &str, base_url: &str, last_ip: Option<&str>) -> StoredRobotRecord {
        StoredRobotRecord {
            robot_id: robot_id.to_string(),
            base_url: base_url.to_string(),
            device_id: "install-1".to_string(),
            control_token: "tok".to_string(),
            last_ip: last_ip.map(str::to_string),
            last_seen: None,
        }
    }

    #[tokio::test]
    async fn find_matches_normalized_url_and_ip() {
        let directory = RobotDirectory::new(Arc::new(MemoryStore::new()));
        directory
            .upsert(record("r1", "http://10.0.0.15:8000", Some("10.0.0.15")))
            .await
            .unwrap();

        let by_url = directory.find("http://10.0.0.15:8000/").await.unwrap();
        assert_eq!(by_url.unwrap().robot_id, "r1");

        let by_ip = directory.find("http://10.0.0.15:9999").await.unwrap();
        assert_eq!(by_ip.unwrap().robot_id, "r1");

        assert!(directory.find("http://10.0.0.99:8000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_by_robot_id() {
        let directory = RobotDirectory::new(Arc::new(MemoryStore::new()));
        directory
            .upsert(record("r1", "http://10.0.0.15:8000", None))
            .await
            .unwrap();
        directory
            .upsert(record("r1", "http://10.0.0.42:8000", None))
            .await
            .unwrap();

        let records = directory.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].base_url, "http://10.0.0.42:8000");
    }

    #[tokio::test]
    async fn unreadable_directory_starts_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set_item(keys::ROBOT_DIRECTORY, "not json").await.unwrap();

        let directory = RobotDirectory::new(store);
        assert!(directory.load().await.unwrap().is_empty());
    }
}
