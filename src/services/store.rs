use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;

use crate::models::job::{JobId, JobStatus};
use crate::models::scan::QrCodeResult;

/// File-per-id backend: `<status_dir>/<id>.json` and `<results_dir>/<id>.json`.
///
/// Files are written to a sibling temp file and renamed into place so a
/// reader never observes a partially written document.
#[derive(Debug, Clone)]
pub struct FileStore {
    status_dir: PathBuf,
    results_dir: PathBuf,
}

impl FileStore {
    pub fn new(status_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            status_dir: status_dir.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn status_path(&self, id: &JobId) -> PathBuf {
        self.status_dir.join(format!("{id}.json"))
    }

    pub fn results_path(&self, id: &JobId) -> PathBuf {
        self.results_dir.join(format!("{id}.json"))
    }

    /// Create both directories.
    pub async fn ensure_dirs(&self) -> Result<(), StoreError> {
        for dir in [&self.status_dir, &self.results_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }
        Ok(())
    }

    pub async fn write_status(&self, status: &JobStatus) -> Result<(), StoreError> {
        write_json_atomic(&self.status_path(&status.id), status).await
    }

    pub async fn read_status(&self, id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        read_json(&self.status_path(id)).await
    }

    pub async fn write_results(
        &self,
        id: &JobId,
        results: &[QrCodeResult],
    ) -> Result<(), StoreError> {
        write_json_atomic(&self.results_path(id), &results).await
    }

    pub async fn read_results(&self, id: &JobId) -> Result<Option<Vec<QrCodeResult>>, StoreError> {
        read_json(&self.results_path(id)).await
    }

    pub async fn remove_results(&self, id: &JobId) -> Result<(), StoreError> {
        let path = self.results_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}

async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StoreError::io(dir, e))?;

    let body = serde_json::to_vec(value)?;
    let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, &body).await {
        return Err(StoreError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let body = match tokio::fs::read(path).await {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })
}

/// Process-local backend. The producer records `Queued` here at submission.
#[derive(Debug, Default)]
pub struct MemoryStore {
    statuses: RwLock<HashMap<JobId, JobStatus>>,
    results: RwLock<HashMap<JobId, Vec<QrCodeResult>>>,
}

impl MemoryStore {
    pub fn put_status(&self, status: JobStatus) {
        if let Ok(mut statuses) = self.statuses.write() {
            statuses.insert(status.id.clone(), status);
        }
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.statuses.read().ok()?.get(id).cloned()
    }

    pub fn put_results(&self, id: JobId, results: Vec<QrCodeResult>) {
        if let Ok(mut map) = self.results.write() {
            map.insert(id, results);
        }
    }

    pub fn results(&self, id: &JobId) -> Option<Vec<QrCodeResult>> {
        self.results.read().ok()?.get(id).cloned()
    }
}

/// Status and result persistence shared by the coordinator and the read API.
///
/// Writes go to the durable backend. Reads consult the durable backend first
/// and fall back to memory, never the reverse, so a restarted process does
/// not serve stale cached state over what is on disk.
pub struct JobStore {
    durable: FileStore,
    memory: MemoryStore,
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobStore {
    pub fn new(durable: FileStore) -> Self {
        Self {
            durable,
            memory: MemoryStore::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn durable(&self) -> &FileStore {
        &self.durable
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Serialize writers of one job id within this process.
    pub async fn lock(&self, id: &JobId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(id.clone()).or_default().clone()
        };
        mutex.lock_owned().await
    }

    pub async fn write_status(&self, status: &JobStatus) -> Result<(), StoreError> {
        self.durable.write_status(status).await
    }

    pub async fn write_results(
        &self,
        id: &JobId,
        results: &[QrCodeResult],
    ) -> Result<(), StoreError> {
        self.durable.write_results(id, results).await
    }

    pub async fn clear_results(&self, id: &JobId) -> Result<(), StoreError> {
        self.durable.remove_results(id).await
    }

    /// `Ok(None)` means the job is unknown to both backends.
    pub async fn status(&self, id: &JobId) -> Result<Option<JobStatus>, StoreError> {
        if let Some(status) = self.durable.read_status(id).await? {
            return Ok(Some(status));
        }
        Ok(self.memory.status(id))
    }

    /// An unknown or unfinished job has an empty result set.
    pub async fn results(&self, id: &JobId) -> Result<Vec<QrCodeResult>, StoreError> {
        if let Some(results) = self.durable.read_results(id).await? {
            return Ok(results);
        }
        Ok(self.memory.results(id).unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt store file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
