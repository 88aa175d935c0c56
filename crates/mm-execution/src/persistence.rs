//! 스냅샷 저장소.
//!
//! 제공 기능:
//! - `<dir>/<name>.json` 원자적 쓰기 (임시 파일 → fsync → rename)
//! - 스냅샷 로드
//! - 레지스트리와 포지션을 묶은 엔진 스냅샷 문서
//! - 주문 경로 밖에서 디스크에 쓰는 백그라운드 writer (이름별 최신 요청 유지)
//!
//! 쓰기 도중 크래시가 나도 이전 스냅샷은 그대로 남습니다.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::position::PositionSnapshot;
use crate::registry::RegistrySnapshot;

/// 엔진 스냅샷 이름.
pub const ENGINE_SNAPSHOT: &str = "engine";
/// 엔진 스냅샷 형식 버전.
pub const ENGINE_SNAPSHOT_VERSION: u32 = 1;

/// 레지스트리와 포지션을 한 시점에 담은 스냅샷.
///
/// 두 부분은 체결 반영이 멈춘 상태에서 함께 만들어지므로, 복구 후
/// 주문 체결량과 포지션이 서로 어긋나지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub registry: RegistrySnapshot,
    pub positions: PositionSnapshot,
}

impl EngineSnapshot {
    pub fn new(registry: RegistrySnapshot, positions: PositionSnapshot) -> Self {
        Self {
            version: ENGINE_SNAPSHOT_VERSION,
            taken_at: Utc::now(),
            registry,
            positions,
        }
    }

    /// 지원하는 형식인지 확인합니다.
    pub fn check_version(&self) -> Result<(), PersistenceError> {
        if self.version != ENGINE_SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                kind: "engine",
                found: self.version,
                expected: ENGINE_SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

/// 디렉토리 기반 스냅샷 저장소.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 스냅샷 파일 경로.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// 값을 직렬화하여 원자적으로 저장합니다.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, PersistenceError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(name, &bytes)
    }

    /// 스냅샷을 로드합니다. 파일이 없으면 None.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, PersistenceError> {
        let path = self.path_for(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let target = self.path_for(name);
        let tmp = self.dir.join(format!(
            "{}.json.tmp.{}.{}",
            name,
            std::process::id(),
            Uuid::new_v4().simple()
        ));

        let written = (|| {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()
        })();
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(PersistenceError::Io { path: tmp, source });
        }

        if let Err(source) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            return Err(PersistenceError::Io {
                path: target,
                source,
            });
        }

        // 디렉토리 fsync는 일부 플랫폼에서 지원되지 않는다
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(path = %target.display(), bytes = bytes.len(), "스냅샷 저장");
        Ok(target)
    }
}

#[derive(Debug, Default)]
struct PendingJobs {
    /// 이름별 가장 최근 요청
    jobs: BTreeMap<String, serde_json::Value>,
    closed: bool,
}

#[derive(Debug, Default)]
struct WriterShared {
    pending: Mutex<PendingJobs>,
    notify: Notify,
}

/// 백그라운드 스냅샷 writer.
///
/// 이름별로 가장 최근 요청만 보관합니다. 디스크가 느리면 중간 요청은
/// 다음 요청으로 덮어써지고, 마지막 요청은 항상 기록됩니다.
/// 주문 경로는 디스크를 기다리지 않습니다.
#[derive(Debug)]
pub struct SnapshotWriter {
    shared: Arc<WriterShared>,
    handle: JoinHandle<()>,
}

impl SnapshotWriter {
    /// writer 태스크를 시작합니다. tokio 런타임 안에서 호출해야 합니다.
    pub fn spawn(store: SnapshotStore) -> Self {
        let shared = Arc::new(WriterShared::default());
        let worker = Arc::clone(&shared);

        let handle = tokio::spawn(async move {
            info!(dir = %store.dir().display(), "스냅샷 writer 시작");
            loop {
                let (jobs, closed) = {
                    let mut pending = worker.pending.lock();
                    (std::mem::take(&mut pending.jobs), pending.closed)
                };

                for (name, payload) in jobs {
                    let store = store.clone();
                    let job_name = name.clone();
                    let result =
                        tokio::task::spawn_blocking(move || store.save(&job_name, &payload)).await;
                    match result {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(name = %name, error = %e, "스냅샷 저장 실패"),
                        Err(e) => error!(name = %name, error = %e, "스냅샷 저장 태스크 실패"),
                    }
                }

                if closed {
                    break;
                }
                worker.notify.notified().await;
            }
            info!("스냅샷 writer 종료");
        });

        Self { shared, handle }
    }

    /// 스냅샷 저장을 요청합니다. 대기하지 않습니다.
    ///
    /// 아직 기록되지 않은 같은 이름의 요청은 이번 요청으로 교체됩니다.
    /// 직렬화에 실패했거나 writer가 종료 중이면 false.
    pub fn submit<T: Serialize>(&self, name: &str, value: &T) -> bool {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!(name, error = %e, "스냅샷 직렬화 실패");
                return false;
            }
        };

        {
            let mut pending = self.shared.pending.lock();
            if pending.closed {
                warn!(name, "스냅샷 writer 종료됨, 요청 폐기");
                return false;
            }
            if pending.jobs.insert(name.to_string(), payload).is_some() {
                debug!(name, "기록 전 스냅샷 요청을 최신 요청으로 교체");
            }
        }
        self.shared.notify.notify_one();
        true
    }

    /// 남은 요청을 모두 기록하고 writer 태스크를 종료합니다.
    pub async fn shutdown(self) -> Result<(), PersistenceError> {
        let Self { shared, handle } = self;
        shared.pending.lock().closed = true;
        shared.notify.notify_one();
        handle.await.map_err(|_| PersistenceError::WriterClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
        items: Vec<String>,
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("state"));

        assert_eq!(store.load::<Doc>("orders").unwrap(), None);

        let doc = Doc {
            version: 1,
            items: vec!["a".into(), "b".into()],
        };
        let path = store.save("orders", &doc).unwrap();
        assert_eq!(path, store.path_for("orders"));
        assert_eq!(store.load::<Doc>("orders").unwrap(), Some(doc));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        for version in 0..5 {
            store
                .save("positions", &Doc { version, items: vec![] })
                .unwrap();
        }

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["positions.json".to_string()]);
        assert_eq!(store.load::<Doc>("positions").unwrap().unwrap().version, 4);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        fs::write(store.path_for("orders"), b"{not json").unwrap();

        assert!(matches!(
            store.load::<Doc>("orders"),
            Err(PersistenceError::Serde(_))
        ));
    }

    #[tokio::test]
    async fn test_writer_flushes_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let writer = SnapshotWriter::spawn(store.clone());

        assert!(writer.submit("orders", &Doc { version: 1, items: vec![] }));
        assert!(writer.submit("orders", &Doc { version: 2, items: vec![] }));
        writer.shutdown().await.unwrap();

        assert_eq!(store.load::<Doc>("orders").unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_writer_keeps_latest_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let writer = SnapshotWriter::spawn(store.clone());

        // current_thread 런타임에서는 writer 태스크가 아직 실행되지 않았다
        for version in 1..=5 {
            assert!(writer.submit("orders", &Doc { version, items: vec![] }));
        }
        assert!(writer.submit("positions", &Doc { version: 7, items: vec![] }));
        writer.shutdown().await.unwrap();

        assert_eq!(store.load::<Doc>("orders").unwrap().unwrap().version, 5);
        assert_eq!(store.load::<Doc>("positions").unwrap().unwrap().version, 7);
    }

    #[tokio::test]
    async fn test_writer_keeps_writing_after_first_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let writer = SnapshotWriter::spawn(store.clone());

        assert!(writer.submit("orders", &Doc { version: 1, items: vec![] }));
        tokio::task::yield_now().await;
        assert!(writer.submit("orders", &Doc { version: 2, items: vec![] }));
        writer.shutdown().await.unwrap();

        assert_eq!(store.load::<Doc>("orders").unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_engine_snapshot_version_check() {
        let registry = crate::registry::OrderRegistry::new().persist();
        let positions = crate::position::PositionTracker::new().persist();
        let mut snapshot = EngineSnapshot::new(registry, positions);
        assert!(snapshot.check_version().is_ok());

        snapshot.version = 2;
        assert!(matches!(
            snapshot.check_version(),
            Err(PersistenceError::UnsupportedVersion { kind: "engine", found: 2, .. })
        ));
    }
}
