use std::error::Error;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{now_utc_rfc3339, RecordKind};
use crate::domain::record::{DailyRecord, WeeklyRecord};

#[cfg(test)]
pub mod memory;

/// The authoritative copy of every record. Writes are unconditional upserts
/// by key, so the last write to reach the remote wins.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert_daily(&self, record: &DailyRecord) -> Result<(), RemoteError>;
    async fn upsert_weekly(&self, record: &WeeklyRecord) -> Result<(), RemoteError>;
    async fn fetch_daily(&self, date: &str) -> Result<Option<DailyRecord>, RemoteError>;
    async fn fetch_weekly(&self, week_start: &str) -> Result<Option<WeeklyRecord>, RemoteError>;
    async fn is_reachable(&self) -> bool;
}

/// Stored shape of a remote document: the record's own fields plus the
/// write stamp assigned by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument<T> {
    #[serde(flatten)]
    pub record: T,
    pub last_modified: String,
}

/// A remote kept as JSON files under one root directory, typically a
/// mounted share. The root must already exist; a missing root reads as an
/// outage rather than an empty remote.
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    root: PathBuf,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root and collection directories.
    pub async fn init(&self) -> std::io::Result<()> {
        for kind in [RecordKind::Daily, RecordKind::Weekly] {
            tokio::fs::create_dir_all(self.collection(kind)).await?;
        }
        Ok(())
    }

    fn collection(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn document_path(&self, kind: RecordKind, key: &str) -> PathBuf {
        self.collection(kind).join(format!("{}.json", key))
    }

    async fn ensure_root(&self) -> Result<(), RemoteError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(RemoteError::Unavailable(format!(
                "remote root {} is not a directory",
                self.root.display()
            ))),
            Err(err) => Err(RemoteError::Unavailable(format!(
                "remote root {} is not reachable: {}",
                self.root.display(),
                err
            ))),
        }
    }

    async fn write_document<T: Serialize + Clone>(
        &self,
        kind: RecordKind,
        key: &str,
        record: &T,
    ) -> Result<(), RemoteError> {
        self.ensure_root().await?;
        let document = RemoteDocument {
            record: record.clone(),
            last_modified: now_utc_rfc3339(),
        };
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|err| RemoteError::rejected(kind, key, err))?;

        let collection = self.collection(kind);
        tokio::fs::create_dir_all(&collection)
            .await
            .map_err(|err| RemoteError::rejected(kind, key, err))?;
        let staging = collection.join(format!(".{}.{}.tmp", key, Uuid::now_v7()));
        let target = self.document_path(kind, key);
        if let Err(err) = tokio::fs::write(&staging, &body).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(RemoteError::rejected(kind, key, err));
        }
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(RemoteError::rejected(kind, key, err));
        }
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<T>, RemoteError> {
        self.ensure_root().await?;
        let raw = match tokio::fs::read(self.document_path(kind, key)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RemoteError::rejected(kind, key, err)),
        };
        let document: RemoteDocument<T> =
            serde_json::from_slice(&raw).map_err(|err| RemoteError::rejected(kind, key, err))?;
        Ok(Some(document.record))
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    async fn upsert_daily(&self, record: &DailyRecord) -> Result<(), RemoteError> {
        self.write_document(RecordKind::Daily, &record.date, record)
            .await
    }

    async fn upsert_weekly(&self, record: &WeeklyRecord) -> Result<(), RemoteError> {
        self.write_document(RecordKind::Weekly, &record.week_start, record)
            .await
    }

    async fn fetch_daily(&self, date: &str) -> Result<Option<DailyRecord>, RemoteError> {
        self.read_document(RecordKind::Daily, date).await
    }

    async fn fetch_weekly(&self, week_start: &str) -> Result<Option<WeeklyRecord>, RemoteError> {
        self.read_document(RecordKind::Weekly, week_start).await
    }

    async fn is_reachable(&self) -> bool {
        self.ensure_root().await.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote could not be contacted at all.
    Unavailable(String),
    /// The remote was reached but refused this particular document.
    Rejected { key: String, message: String },
}

impl RemoteError {
    fn rejected(kind: RecordKind, key: &str, err: impl fmt::Display) -> Self {
        RemoteError::Rejected {
            key: format!("{}/{}", kind.as_str(), key),
            message: err.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Unavailable(message) => write!(f, "remote unavailable: {}", message),
            RemoteError::Rejected { key, message } => {
                write!(f, "remote rejected '{}': {}", key, message)
            }
        }
    }
}

impl Error for RemoteError {}
