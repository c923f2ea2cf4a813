//! Zone orchestration.
//!
//! Ties the control client to the zone-file engine: the daemon says where a
//! zone's file lives, the file is edited on disk, and the daemon is told to
//! reload. Every read-modify-write for a zone runs under that zone's lock,
//! so two API calls editing the same zone cannot lose each other's change.
//! Writers outside this process are not coordinated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::control::{ControlClient, ControlError};
use crate::zonefile::{Record, ZoneFile, ZoneFileError};

/// Errors from zone-level operations.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("zone {0} has no zone file configured")]
    NoFile(String),

    #[error(transparent)]
    File(#[from] ZoneFileError),

    /// The file on disk is updated but the daemon still serves the old data.
    #[error("zone file {} was written but the daemon reload failed: {source}", path.display())]
    PartialFailure { path: PathBuf, source: ControlError },

    #[error("no {rtype} record named {name} in zone {zone}")]
    RecordNotFound {
        zone: String,
        name: String,
        rtype: String,
    },
}

type LockMap = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

/// Held for the duration of one zone edit. On release the map entry is
/// dropped unless another caller holds or waits for the same zone.
struct ZoneLock<'a> {
    locks: &'a LockMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ZoneLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// File-backed zone operations on top of a [`ControlClient`].
pub struct ZoneManager {
    client: Arc<ControlClient>,
    locks: LockMap,
}

impl ZoneManager {
    pub fn new(client: Arc<ControlClient>) -> Self {
        Self {
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying control client.
    pub fn client(&self) -> &ControlClient {
        &self.client
    }

    async fn lock_zone(&self, zone: &str) -> ZoneLock<'_> {
        let key = zone.to_ascii_lowercase();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        ZoneLock {
            locks: &self.locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_zones(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn zone_file_path(&self, zone: &str) -> Result<PathBuf, ZoneError> {
        let info = self.client.get_zone(zone).await?;
        match info.file {
            Some(file) if !file.trim().is_empty() => Ok(PathBuf::from(file)),
            _ => Err(ZoneError::NoFile(zone.to_string())),
        }
    }

    /// Load the zone's file as the daemon currently has it configured.
    pub async fn get_zone_file(&self, zone: &str) -> Result<ZoneFile, ZoneError> {
        let path = self.zone_file_path(zone).await?;
        Ok(ZoneFile::load(&path).await?)
    }

    /// Replace the zone's file wholesale and reload the daemon.
    pub async fn update_zone_file(&self, zone: &str, file: &ZoneFile) -> Result<(), ZoneError> {
        let _guard = self.lock_zone(zone).await;
        let path = self.zone_file_path(zone).await?;
        self.save_and_reload(zone, &path, file).await
    }

    async fn save_and_reload(&self, zone: &str, path: &Path, file: &ZoneFile) -> Result<(), ZoneError> {
        file.save(path).await?;
        if let Err(source) = self.client.reload().await {
            warn!(zone, path = %path.display(), error = %source, "zone file written but reload failed");
            return Err(ZoneError::PartialFailure {
                path: path.to_path_buf(),
                source,
            });
        }
        info!(zone, path = %path.display(), records = file.records.len(), "zone file updated and daemon reloaded");
        Ok(())
    }

    /// Load, edit, and (when `edit` says so) save and reload, all under the zone lock.
    async fn modify<T>(
        &self,
        zone: &str,
        edit: impl FnOnce(&mut ZoneFile) -> Result<(T, bool), ZoneError>,
    ) -> Result<T, ZoneError> {
        let _guard = self.lock_zone(zone).await;
        let path = self.zone_file_path(zone).await?;
        let mut file = ZoneFile::load(&path).await?;
        let (result, changed) = edit(&mut file)?;
        if changed {
            self.save_and_reload(zone, &path, &file).await?;
        }
        Ok(result)
    }

    pub async fn add_zone_record(&self, zone: &str, record: Record) -> Result<(), ZoneError> {
        self.modify(zone, |file| {
            file.add_record(record);
            Ok(((), true))
        })
        .await
    }

    /// Replace the first record with the same `(name, type)`. Nothing is
    /// written when no record matches.
    pub async fn update_zone_record(&self, zone: &str, record: Record) -> Result<(), ZoneError> {
        self.modify(zone, |file| {
            let (name, rtype) = (record.name.clone(), record.rtype.clone());
            if file.update_record(record) {
                Ok(((), true))
            } else {
                Err(ZoneError::RecordNotFound {
                    zone: zone.to_string(),
                    name,
                    rtype,
                })
            }
        })
        .await
    }

    /// Remove every record with this `(name, type)` and return the count.
    /// A count of zero is not an error and leaves the file untouched.
    pub async fn remove_zone_record(&self, zone: &str, name: &str, rtype: &str) -> Result<usize, ZoneError> {
        self.modify(zone, |file| {
            let removed = file.remove_record(name, rtype);
            Ok((removed, removed > 0))
        })
        .await
    }

    pub async fn get_zone_record(&self, zone: &str, name: &str, rtype: &str) -> Result<Record, ZoneError> {
        let file = self.get_zone_file(zone).await?;
        file.get_record(name, rtype)
            .cloned()
            .ok_or_else(|| ZoneError::RecordNotFound {
                zone: zone.to_string(),
                name: name.to_string(),
                rtype: rtype.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use ubctl_test_utils::fixtures::EXAMPLE_ZONE;
    use ubctl_test_utils::{FakeDaemon, Reply, TestConfigBuilder};

    struct Harness {
        manager: ZoneManager,
        daemon: FakeDaemon,
        zone_path: PathBuf,
        reload_fails: Arc<AtomicBool>,
        _tmp: TempDir,
    }

    /// A daemon with `example.com` backed by a file in a temp dir, and
    /// `nofile.example` without one.
    async fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let zone_path = tmp.path().join("zones/example.com.zone");
        std::fs::create_dir_all(zone_path.parent().unwrap()).unwrap();
        std::fs::write(&zone_path, EXAMPLE_ZONE).unwrap();

        let reload_fails = Arc::new(AtomicBool::new(false));
        let get_zone = format!(
            r#"{{"name":"example.com","type":"primary","file":{}}}"#,
            serde_json::to_string(&zone_path.display().to_string()).unwrap()
        );
        let daemon = {
            let reload_fails = reload_fails.clone();
            FakeDaemon::unix(move |line| {
                match line.strip_prefix("UBCT1  ").unwrap_or(line) {
                    "get_zone example.com" => Reply::text(get_zone.clone()),
                    "get_zone nofile.example" => Reply::text(r#"{"name":"nofile.example","type":"forward"}"#),
                    "reload" if reload_fails.load(Ordering::SeqCst) => Reply::text("error reload failed: syntax error"),
                    "reload" => Reply::text("ok"),
                    other => Reply::text(format!("error unknown command {other}")),
                }
            })
            .await
        };

        let config = TestConfigBuilder::new()
            .control_unix(daemon.socket_path())
            .fast_timeouts()
            .build();
        let client = Arc::new(ControlClient::from_config(&config.control).unwrap());
        Harness {
            manager: ZoneManager::new(client),
            daemon,
            zone_path,
            reload_fails,
            _tmp: tmp,
        }
    }

    fn commands(daemon: &FakeDaemon) -> Vec<String> {
        daemon
            .received()
            .into_iter()
            .map(|l| l.trim_start_matches("UBCT1  ").to_string())
            .collect()
    }

    async fn disk(path: &Path) -> ZoneFile {
        ZoneFile::load(path).await.unwrap()
    }

    #[tokio::test]
    async fn test_get_zone_file() {
        let h = harness().await;
        let file = h.manager.get_zone_file("example.com").await.unwrap();
        assert_eq!(file.name, "example.com.zone");
        assert_eq!(file.records.len(), 4);
    }

    #[tokio::test]
    async fn test_zone_without_file() {
        let h = harness().await;
        let err = h.manager.get_zone_file("nofile.example").await.unwrap_err();
        assert!(matches!(err, ZoneError::NoFile(ref z) if z == "nofile.example"));
    }

    #[tokio::test]
    async fn test_unknown_zone_is_control_error() {
        let h = harness().await;
        let err = h.manager.get_zone_file("missing.example").await.unwrap_err();
        assert!(matches!(err, ZoneError::Control(ControlError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_add_record_writes_and_reloads() {
        let h = harness().await;
        h.manager
            .add_zone_record("example.com", Record::new("ftp", 600, "IN", "A", "192.0.2.21"))
            .await
            .unwrap();

        let file = disk(&h.zone_path).await;
        assert_eq!(file.records.len(), 5);
        assert_eq!(file.get_record("ftp", "A").unwrap().ttl, 600);
        assert_eq!(commands(&h.daemon), vec!["get_zone example.com", "reload"]);
    }

    #[tokio::test]
    async fn test_update_missing_record_writes_nothing() {
        let h = harness().await;
        let before = std::fs::read_to_string(&h.zone_path).unwrap();

        let err = h
            .manager
            .update_zone_record("example.com", Record::new("nope", 0, "IN", "A", "192.0.2.1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ZoneError::RecordNotFound { .. }));
        assert_eq!(std::fs::read_to_string(&h.zone_path).unwrap(), before);
        assert_eq!(commands(&h.daemon), vec!["get_zone example.com"]);
    }

    #[tokio::test]
    async fn test_update_record() {
        let h = harness().await;
        h.manager
            .update_zone_record("example.com", Record::new("www", 60, "IN", "A", "192.0.2.11"))
            .await
            .unwrap();
        let file = disk(&h.zone_path).await;
        assert_eq!(file.get_record("www", "A").unwrap().rdata, "192.0.2.11");
    }

    #[tokio::test]
    async fn test_remove_record_counts() {
        let h = harness().await;
        let removed = h.manager.remove_zone_record("example.com", "mail", "A").await.unwrap();
        assert_eq!(removed, 1);

        let removed = h.manager.remove_zone_record("example.com", "mail", "A").await.unwrap();
        assert_eq!(removed, 0);
        // The second removal found nothing and did not reload.
        assert_eq!(
            commands(&h.daemon),
            vec!["get_zone example.com", "reload", "get_zone example.com"]
        );
    }

    #[tokio::test]
    async fn test_get_record() {
        let h = harness().await;
        let record = h.manager.get_zone_record("example.com", "www", "A").await.unwrap();
        assert_eq!(record.rdata, "192.0.2.10");

        let err = h.manager.get_zone_record("example.com", "www", "MX").await.unwrap_err();
        assert!(matches!(err, ZoneError::RecordNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reload_failure_is_partial_failure_with_file_persisted() {
        let h = harness().await;
        h.reload_fails.store(true, Ordering::SeqCst);

        let mut file = h.manager.get_zone_file("example.com").await.unwrap();
        file.add_record(Record::new("new", 0, "IN", "A", "192.0.2.77"));

        let err = h.manager.update_zone_file("example.com", &file).await.unwrap_err();
        match &err {
            ZoneError::PartialFailure { path, source } => {
                assert_eq!(path, &h.zone_path);
                assert_eq!(source.to_string(), "error reload failed: syntax error");
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        let on_disk = disk(&h.zone_path).await;
        assert_eq!(on_disk.get_record("new", "A").unwrap().rdata, "192.0.2.77");
    }

    #[tokio::test]
    async fn test_concurrent_edits_to_one_zone_are_not_lost() {
        let h = Arc::new(harness().await);
        let mut handles = Vec::new();
        for i in 0..10 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                let record = Record::new(&format!("host{i}"), 0, "IN", "A", &format!("192.0.2.{i}"));
                h.manager.add_zone_record("example.com", record).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let file = disk(&h.zone_path).await;
        assert_eq!(file.records.len(), 4 + 10);
        assert_eq!(h.manager.tracked_zones(), 0);
    }

    #[tokio::test]
    async fn test_unknown_zones_leave_no_lock_behind() {
        let h = harness().await;
        for i in 0..20 {
            let zone = format!("missing{i}.example");
            let record = Record::new("www", 0, "IN", "A", "192.0.2.1");
            assert!(h.manager.add_zone_record(&zone, record).await.is_err());
            assert!(h.manager.remove_zone_record(&zone, "www", "A").await.is_err());
            assert!(h.manager.update_zone_file(&zone, &ZoneFile::new("x")).await.is_err());
        }
        assert_eq!(h.manager.tracked_zones(), 0);

        h.manager
            .add_zone_record("example.com", Record::new("ftp", 0, "IN", "A", "192.0.2.21"))
            .await
            .unwrap();
        assert_eq!(h.manager.tracked_zones(), 0);
    }

    #[tokio::test]
    async fn test_zone_lock_kept_while_held() {
        let h = harness().await;
        let held = h.manager.lock_zone("Example.com").await;
        assert_eq!(h.manager.tracked_zones(), 1);
        drop(held);
        assert_eq!(h.manager.tracked_zones(), 0);
    }
}
