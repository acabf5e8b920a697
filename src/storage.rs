//! Result sink: where finished session records go.
//!
//! `JsonFileSink` writes one `result_<session>_<timestamp>.json` per session
//! via temp file + rename, so a crash never leaves a half-written record.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::fs;

use crate::session::SessionRecord;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("result storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("result record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Store a finished record. Called once per session.
    async fn persist(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// All stored records, oldest first.
    async fn list(&self) -> Result<Vec<SessionRecord>, StorageError>;

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError>;
}

pub type DynSink = Arc<dyn ResultSink>;

pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(record: &SessionRecord) -> String {
        format!(
            "result_{}_{}.json",
            record.session_id,
            record.completed_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    async fn result_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut out = Vec::new();
        let mut rd = match fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("result_") && name.ends_with(".json") {
                out.push(entry.path());
            }
        }
        out.sort();
        Ok(out)
    }
}

async fn read_record(path: &Path) -> Result<SessionRecord, StorageError> {
    let s = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&s)?)
}

#[async_trait]
impl ResultSink for JsonFileSink {
    async fn persist(&self, record: &SessionRecord) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(Self::file_name(record));
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        tracing::info!(
            session_id = %record.session_id,
            diagnosis = %record.diagnosis,
            path = %path.display(),
            "session record persisted"
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let mut records = Vec::new();
        for path in self.result_files().await? {
            match read_record(&path).await {
                Ok(r) => records.push(r),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable result file")
                }
            }
        }
        records.sort_by_key(|r| r.completed_at);
        Ok(records)
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let prefix = format!("result_{session_id}_");
        for path in self.result_files().await? {
            let matches = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false);
            if matches {
                return read_record(&path).await.map(Some);
            }
        }
        Ok(None)
    }
}

/// Keeps records in memory; used by tests and the local demo.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn persist(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>, StorageError> {
        Ok(self.records())
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .records()
            .into_iter()
            .find(|r| r.session_id == session_id))
    }
}
