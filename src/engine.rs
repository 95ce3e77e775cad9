use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::queue::{FailureDisposition, RecordRef, RetryPolicy, SyncOperation, SyncQueueEntry};
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{LocalStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Entries still inside their backoff window are left for later.
    Automatic,
    /// Every pending, unflagged entry is attempted now.
    Forced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Offline,
    AlreadyRunning,
    Completed(DrainSummary),
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub pushed: u64,
    pub failed: u64,
    pub flagged: u64,
    pub deferred: u64,
    pub storage_errors: u64,
    pub interrupted: bool,
    pub remaining: u64,
}

/// Pushes queued mutations to the remote. One drain runs at a time; each
/// successful push is marked synced in its own commit, so abandoning a
/// drain midway never loses or double-marks an entry.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    policy: RetryPolicy,
    drain_lock: tokio::sync::Mutex<()>,
    degraded: AtomicBool,
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteStore>, policy: RetryPolicy) -> Self {
        Self {
            store,
            remote,
            policy,
            drain_lock: tokio::sync::Mutex::new(()),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    /// True when the last drain was cut short by a remote outage.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn is_draining(&self) -> bool {
        self.drain_lock.try_lock().is_err()
    }

    pub async fn drain(&self, mode: DrainMode) -> DrainOutcome {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("sync drain already running; skipping");
            return DrainOutcome::AlreadyRunning;
        };
        DrainOutcome::Completed(self.drain_locked(mode).await)
    }

    async fn drain_locked(&self, mode: DrainMode) -> DrainSummary {
        let mut summary = DrainSummary::default();
        let entries = match self.store.pending_entries() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read sync queue; will retry next drain");
                summary.storage_errors += 1;
                return summary;
            }
        };
        if entries.is_empty() {
            self.degraded.store(false, Ordering::SeqCst);
            return summary;
        }
        tracing::info!(pending = entries.len(), ?mode, "sync drain started");

        let now = OffsetDateTime::now_utc();
        let mut blocked: HashSet<RecordRef> = HashSet::new();
        for entry in entries {
            let target = entry.operation.target();
            if blocked.contains(&target) {
                summary.deferred += 1;
                continue;
            }
            if entry.flagged || (mode == DrainMode::Automatic && !entry.is_due(now)) {
                blocked.insert(target);
                summary.deferred += 1;
                continue;
            }

            match self.push_entry(&entry).await {
                Ok(()) => summary.pushed += 1,
                Err(SyncError::Remote(err)) if err.is_unavailable() => {
                    tracing::warn!(error = %err, entry = entry.id, "remote unavailable; stopping drain");
                    self.degraded.store(true, Ordering::SeqCst);
                    summary.interrupted = true;
                    break;
                }
                Err(SyncError::Remote(err)) => {
                    summary.failed += 1;
                    blocked.insert(target);
                    if self.note_rejection(&entry, &err, now) {
                        summary.flagged += 1;
                    }
                }
                Err(SyncError::Storage(err)) => {
                    tracing::warn!(error = %err, entry = entry.id, "failed to record push; will retry next drain");
                    summary.storage_errors += 1;
                    blocked.insert(target);
                }
            }
        }

        if !summary.interrupted {
            self.degraded.store(false, Ordering::SeqCst);
            if let Err(err) = self.store.touch_last_sync_at() {
                tracing::warn!(error = %err, "failed to record last sync time");
            }
        }
        summary.remaining = self.store.count_pending().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to count pending entries");
            0
        });
        tracing::info!(
            pushed = summary.pushed,
            failed = summary.failed,
            deferred = summary.deferred,
            remaining = summary.remaining,
            interrupted = summary.interrupted,
            "sync drain finished"
        );
        summary
    }

    async fn push_entry(&self, entry: &SyncQueueEntry) -> Result<(), SyncError> {
        match &entry.operation {
            SyncOperation::SaveDailyData(record) => self.remote.upsert_daily(record).await?,
            SyncOperation::SaveWeeklyData(record) => self.remote.upsert_weekly(record).await?,
        }
        self.store.mark_synced(entry.id)?;
        Ok(())
    }

    /// Records a rejection. Returns true when the entry got flagged.
    fn note_rejection(&self, entry: &SyncQueueEntry, err: &RemoteError, now: OffsetDateTime) -> bool {
        match self
            .store
            .record_failure(entry.id, &err.to_string(), &self.policy, now)
        {
            Ok(FailureDisposition::RetryAt(at)) => {
                tracing::warn!(error = %err, entry = entry.id, retry_at = %at, "remote rejected entry");
                false
            }
            Ok(FailureDisposition::Flagged) => {
                tracing::error!(
                    error = %err,
                    entry = entry.id,
                    key = entry.operation.record_key(),
                    "entry flagged for manual review after repeated rejections"
                );
                true
            }
            Err(storage) => {
                tracing::warn!(error = %storage, entry = entry.id, "failed to record rejection");
                false
            }
        }
    }
}

#[derive(Debug)]
pub enum SyncError {
    Remote(RemoteError),
    Storage(StorageError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Remote(err) => write!(f, "{}", err),
            SyncError::Storage(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Remote(err) => Some(err),
            SyncError::Storage(err) => Some(err),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        SyncError::Remote(value)
    }
}

impl From<StorageError> for SyncError {
    fn from(value: StorageError) -> Self {
        SyncError::Storage(value)
    }
}
