use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::config::{ConfigError, SyncConfig};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::db::{RecordKind, SettingRecord, WipeSummary};
use crate::domain::record::{DailyRecord, WeeklyRecord};
use crate::domain::week::{parse_iso_date, WeekWindow};
use crate::engine::{DrainMode, DrainOutcome, SyncEngine};
use crate::export::{ExportError, WeeklyExport};
use crate::queue::QueueEntryView;
use crate::remote::RemoteStore;
use crate::store::{LocalStore, StorageError};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub pending_sync: u64,
    pub degraded: bool,
    pub flagged: u64,
    pub last_sync_at: Option<String>,
}

pub struct TrackerOptions {
    pub db_path: String,
    pub remote: Arc<dyn RemoteStore>,
    pub config: SyncConfig,
    /// Forces the initial connectivity state instead of probing the remote.
    pub online: Option<bool>,
}

/// Entry point for reading and writing records. Writes always land locally
/// first; while online each write is followed by a drain of the sync queue.
pub struct Tracker {
    store: LocalStore,
    engine: Arc<SyncEngine>,
    connectivity: Arc<Connectivity>,
    config: SyncConfig,
}

impl Tracker {
    pub async fn open(options: TrackerOptions) -> Result<Self, AppError> {
        let store = LocalStore::open(&options.db_path)?;
        let pruned = store.prune_synced_older_than(options.config.retention)?;
        if pruned > 0 {
            tracing::debug!(pruned, "pruned synced queue entries past retention");
        }

        let online = match options.online {
            Some(online) => online,
            None => options.remote.is_reachable().await,
        };
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            options.remote,
            options.config.retry,
        ));
        Ok(Self {
            store,
            engine,
            connectivity: Arc::new(Connectivity::new(online)),
            config: options.config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn monitor(&self) -> ConnectivityMonitor {
        ConnectivityMonitor::new(self.connectivity.clone(), self.engine.clone())
    }

    /// Feeds one connectivity observation; reconnecting drains the queue.
    pub async fn set_online(&self, online: bool) -> Option<DrainOutcome> {
        self.monitor().observe(online).await
    }

    pub async fn save_daily_data(&self, record: DailyRecord) -> Result<(), StorageError> {
        let saved = self.store.save_daily(&record)?;
        tracing::debug!(date = %record.date, entry = saved.entry_id, "saved daily record");
        self.drain_if_online().await;
        Ok(())
    }

    pub async fn load_daily_data(&self, date: &str) -> Result<Option<DailyRecord>, StorageError> {
        if let Some(record) = self.store.get(RecordKind::Daily, date)? {
            return Ok(Some(record));
        }
        if !self.is_online() {
            return Ok(None);
        }
        match self.engine.remote().fetch_daily(date).await {
            Ok(Some(record)) => {
                tracing::debug!(date, "seeding local store from remote");
                self.store.seed_daily(&record)?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(error = %err, date, "remote fallback read failed");
                Ok(None)
            }
        }
    }

    /// Every local daily record, oldest first. Never consults the remote.
    pub fn get_all_daily_data(&self) -> Result<Vec<DailyRecord>, StorageError> {
        self.store.get_all(RecordKind::Daily)
    }

    pub async fn save_weekly_data(&self, record: WeeklyRecord) -> Result<WeeklyRecord, StorageError> {
        let (entry_id, stored) = self.store.save_weekly(&record)?;
        tracing::debug!(week_start = %stored.week_start, entry = entry_id, "saved weekly record");
        self.drain_if_online().await;
        Ok(stored)
    }

    /// Loads the week containing `date`; any day of the week may be given.
    pub async fn load_weekly_data(&self, date: &str) -> Result<Option<WeeklyRecord>, StorageError> {
        let week_start = WeekWindow::containing(parse_iso_date(date)?).start_key();
        if let Some(record) = self.store.get(RecordKind::Weekly, &week_start)? {
            return Ok(Some(record));
        }
        if !self.is_online() {
            return Ok(None);
        }
        match self.engine.remote().fetch_weekly(&week_start).await {
            Ok(Some(record)) => {
                tracing::debug!(week_start = %week_start, "seeding local store from remote");
                Ok(Some(self.store.seed_weekly(&record)?))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(error = %err, week_start = %week_start, "remote fallback read failed");
                Ok(None)
            }
        }
    }

    pub fn get_sync_status(&self) -> Result<SyncStatus, StorageError> {
        Ok(SyncStatus {
            is_online: self.is_online(),
            pending_sync: self.store.count_pending()?,
            degraded: self.engine.is_degraded(),
            flagged: self.store.count_flagged()?,
            last_sync_at: self.store.last_sync_at()?,
        })
    }

    /// Drains now, ignoring backoff. Flagged entries still wait for
    /// `retry_flagged`.
    pub async fn force_sync(&self) -> DrainOutcome {
        if !self.is_online() {
            return DrainOutcome::Offline;
        }
        self.engine.drain(DrainMode::Forced).await
    }

    pub fn retry_flagged(&self) -> Result<u64, StorageError> {
        let requeued = self.store.requeue_flagged()?;
        if requeued > 0 {
            tracing::info!(requeued, "flagged entries returned to the sync queue");
        }
        Ok(requeued)
    }

    pub async fn export_weekly_data(&self, week_start: &str) -> Result<String, ExportError> {
        let week = self
            .load_weekly_data(week_start)
            .await?
            .ok_or_else(|| ExportError::NotFound(week_start.to_string()))?;
        WeeklyExport::new(week, OffsetDateTime::now_utc()).to_pretty_json()
    }

    pub fn queue_entries(&self, limit: u32) -> Result<Vec<QueueEntryView>, StorageError> {
        Ok(self
            .store
            .list_entries(limit)?
            .iter()
            .map(|entry| entry.view())
            .collect())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.store.get_setting(key)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.store.set_setting(key, value)
    }

    pub fn list_settings(&self) -> Result<Vec<SettingRecord>, StorageError> {
        self.store.list_settings()
    }

    /// Irreversible. Unsynced changes are lost along with everything else.
    pub fn wipe_all_local_data(&self) -> Result<WipeSummary, StorageError> {
        let summary = self.store.wipe_all_local_data()?;
        tracing::warn!(
            daily = summary.daily_records,
            weekly = summary.weekly_records,
            queued = summary.queue_entries,
            "wiped all local data"
        );
        Ok(summary)
    }

    pub fn close(self) -> Result<(), StorageError> {
        self.store.close()
    }

    async fn drain_if_online(&self) {
        if self.is_online() {
            self.engine.drain(DrainMode::Automatic).await;
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Io(std::io::Error),
    Storage(StorageError),
    Config(ConfigError),
    Export(ExportError),
    InvalidInput(String),
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Io(err) => write!(f, "I/O error: {}", err),
            AppError::Storage(err) => write!(f, "{}", err),
            AppError::Config(err) => write!(f, "{}", err),
            AppError::Export(err) => write!(f, "export error: {}", err),
            AppError::InvalidInput(message) => write!(f, "{}", message),
            AppError::NotFound(what) => write!(f, "{} not found", what),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Io(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Config(err) => Some(err),
            AppError::Export(err) => Some(err),
            AppError::InvalidInput(_) => None,
            AppError::NotFound(_) => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::Io(value)
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        AppError::Storage(value)
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        AppError::Config(value)
    }
}

impl From<ExportError> for AppError {
    fn from(value: ExportError) -> Self {
        AppError::Export(value)
    }
}
