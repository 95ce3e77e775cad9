use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::db::{self, PutRecord, RecordKind, SettingRecord, StoredRecord, WipeSummary};
use crate::domain::record::{DailyRecord, WeeklyRecord};
use crate::domain::week::{parse_iso_date, InvalidDate, WeekWindow};
use crate::queue::{self, FailureDisposition, RetryPolicy, SyncOperation, SyncQueueEntry};

const LAST_SYNC_AT_KEY: &str = "last_sync_at";

/// Process-wide handle on the local SQLite store. Clones share one
/// connection; every call takes the lock for its whole transaction, so
/// writes land in the order callers issue them.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDaily {
    pub entry_id: i64,
    pub week: WeeklyRecord,
}

impl LocalStore {
    pub fn open(db_path: &str) -> Result<Self, StorageError> {
        ensure_parent_dir(db_path)?;
        let conn = db::open_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut guard)
    }

    pub fn put<T: Serialize>(
        &self,
        kind: RecordKind,
        key: &str,
        record: &T,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        self.with_conn(|conn| put_in(conn, kind, key, record))
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        validate_key(key)?;
        self.with_conn(|conn| get_in(conn, kind, key))
    }

    pub fn get_all<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Vec<T>, StorageError> {
        self.with_conn(|conn| {
            db::list_records(conn, kind)?
                .iter()
                .map(|stored| decode_stored(kind, stored))
                .collect()
        })
    }

    /// Irreversibly deletes every local record, queued sync entry, and
    /// setting, including entries that never reached the remote.
    pub fn wipe_all_local_data(&self) -> Result<WipeSummary, StorageError> {
        self.with_conn(|conn| Ok(db::wipe_all_local_data(conn)?))
    }

    /// Saves a day, rebuilds its week, and queues the day for sync in one
    /// transaction.
    pub fn save_daily(&self, record: &DailyRecord) -> Result<SavedDaily, StorageError> {
        validate_key(&record.date)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            put_in(&tx, RecordKind::Daily, &record.date, record)?;
            let week = rebuild_week_in(&tx, &record.date)?;
            let entry_id = queue::enqueue(
                &tx,
                &SyncOperation::SaveDailyData(record.clone()),
                &db::now_utc_rfc3339(),
            )?;
            tx.commit()?;
            Ok(SavedDaily { entry_id, week })
        })
    }

    /// Caches a day fetched from the remote. Nothing is queued.
    pub fn seed_daily(&self, record: &DailyRecord) -> Result<WeeklyRecord, StorageError> {
        validate_key(&record.date)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            put_in(&tx, RecordKind::Daily, &record.date, record)?;
            let week = rebuild_week_in(&tx, &record.date)?;
            tx.commit()?;
            Ok(week)
        })
    }

    /// Normalizes, saves, and queues a week in one transaction. Returns the
    /// normalized record as stored.
    pub fn save_weekly(&self, record: &WeeklyRecord) -> Result<(i64, WeeklyRecord), StorageError> {
        let normalized = normalize_week(record)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            put_in(&tx, RecordKind::Weekly, &normalized.week_start, &normalized)?;
            let entry_id = queue::enqueue(
                &tx,
                &SyncOperation::SaveWeeklyData(normalized.clone()),
                &db::now_utc_rfc3339(),
            )?;
            tx.commit()?;
            Ok((entry_id, normalized))
        })
    }

    pub fn seed_weekly(&self, record: &WeeklyRecord) -> Result<WeeklyRecord, StorageError> {
        let normalized = normalize_week(record)?;
        self.with_conn(|conn| {
            put_in(conn, RecordKind::Weekly, &normalized.week_start, &normalized)?;
            Ok(normalized)
        })
    }

    pub fn enqueue(&self, operation: &SyncOperation) -> Result<i64, StorageError> {
        self.with_conn(|conn| queue::enqueue(conn, operation, &db::now_utc_rfc3339()))
    }

    pub fn pending_entries(&self) -> Result<Vec<SyncQueueEntry>, StorageError> {
        self.with_conn(|conn| queue::pending_entries(conn))
    }

    pub fn list_entries(&self, limit: u32) -> Result<Vec<SyncQueueEntry>, StorageError> {
        self.with_conn(|conn| queue::list_entries(conn, limit))
    }

    pub fn mark_synced(&self, id: i64) -> Result<bool, StorageError> {
        self.with_conn(|conn| queue::mark_synced(conn, id, &db::now_utc_rfc3339()))
    }

    pub fn record_failure(
        &self,
        id: i64,
        error: &str,
        policy: &RetryPolicy,
        now: OffsetDateTime,
    ) -> Result<FailureDisposition, StorageError> {
        self.with_conn(|conn| queue::record_failure(conn, id, error, policy, now))
    }

    pub fn count_pending(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| queue::count_pending(conn))
    }

    pub fn count_flagged(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| queue::count_flagged(conn))
    }

    pub fn requeue_flagged(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| queue::requeue_flagged(conn))
    }

    pub fn prune_synced_older_than(&self, retention: Duration) -> Result<u64, StorageError> {
        let cutoff = db::format_rfc3339(db::saturating_sub(OffsetDateTime::now_utc(), retention));
        self.with_conn(|conn| queue::prune_synced(conn, &cutoff))
    }

    pub fn last_sync_at(&self) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| Ok(db::get_meta(conn, LAST_SYNC_AT_KEY)?))
    }

    pub fn touch_last_sync_at(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| Ok(db::set_meta(conn, LAST_SYNC_AT_KEY, &db::now_utc_rfc3339())?))
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_conn(|conn| Ok(db::get_setting(conn, key)?))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_conn(|conn| Ok(db::set_setting(conn, key, value)?))
    }

    pub fn list_settings(&self) -> Result<Vec<SettingRecord>, StorageError> {
        self.with_conn(|conn| Ok(db::list_settings(conn)?))
    }

    /// Checkpoints the WAL so the database file is self-contained.
    pub fn close(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| Ok(db::checkpoint(conn)?))
    }
}

pub(crate) fn payload_checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    parse_iso_date(key)?;
    Ok(())
}

fn put_in<T: Serialize>(
    conn: &Connection,
    kind: RecordKind,
    key: &str,
    record: &T,
) -> Result<(), StorageError> {
    let payload = serde_json::to_string(record)?;
    db::put_record(
        conn,
        &PutRecord {
            kind,
            key,
            payload: &payload,
            checksum: &payload_checksum(&payload),
            updated_at: &db::now_utc_rfc3339(),
        },
    )?;
    Ok(())
}

fn get_in<T: DeserializeOwned>(
    conn: &Connection,
    kind: RecordKind,
    key: &str,
) -> Result<Option<T>, StorageError> {
    db::get_record(conn, kind, key)?
        .map(|stored| decode_stored(kind, &stored))
        .transpose()
}

fn decode_stored<T: DeserializeOwned>(
    kind: RecordKind,
    stored: &StoredRecord,
) -> Result<T, StorageError> {
    let corrupt = |message: String| StorageError::Corrupt {
        table: kind.as_str(),
        key: stored.key.clone(),
        message,
    };
    if payload_checksum(&stored.payload) != stored.checksum {
        return Err(corrupt("payload checksum mismatch".to_string()));
    }
    serde_json::from_str(&stored.payload).map_err(|err| corrupt(err.to_string()))
}

/// Rebuilds the week containing `date`: existing members are kept, every
/// local daily record in the window replaces its counterpart, and all
/// derived fields are recomputed.
fn rebuild_week_in(conn: &Connection, date: &str) -> Result<WeeklyRecord, StorageError> {
    let window = WeekWindow::containing_iso(date)?;
    let start = window.start_key();
    let end = window.end_key();

    let mut members: Vec<DailyRecord> =
        match get_in::<WeeklyRecord>(conn, RecordKind::Weekly, &start)? {
            Some(existing) => existing.daily_records,
            None => Vec::new(),
        };
    for stored in db::list_records_between(conn, RecordKind::Daily, &start, &end)? {
        let local: DailyRecord = decode_stored(RecordKind::Daily, &stored)?;
        members.retain(|member| member.date != local.date);
        members.push(local);
    }

    let week = WeeklyRecord::from_members(&start, members)?;
    put_in(conn, RecordKind::Weekly, &start, &week)?;
    Ok(week)
}

fn normalize_week(record: &WeeklyRecord) -> Result<WeeklyRecord, StorageError> {
    let week = WeeklyRecord::from_members(&record.week_start, record.daily_records.clone())?;
    Ok(week)
}

fn ensure_parent_dir(path: &str) -> Result<(), StorageError> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug)]
pub enum StorageError {
    Db(rusqlite::Error),
    Io(std::io::Error),
    Serialize(serde_json::Error),
    InvalidKey(InvalidDate),
    Corrupt {
        table: &'static str,
        key: String,
        message: String,
    },
    UnknownEntry(i64),
    Poisoned,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Db(err) => write!(f, "database error: {}", err),
            StorageError::Io(err) => write!(f, "I/O error: {}", err),
            StorageError::Serialize(err) => write!(f, "failed to serialize record: {}", err),
            StorageError::InvalidKey(err) => write!(f, "{}", err),
            StorageError::Corrupt {
                table,
                key,
                message,
            } => write!(f, "corrupt {} entry '{}': {}", table, key, message),
            StorageError::UnknownEntry(id) => write!(f, "sync queue entry {} does not exist", id),
            StorageError::Poisoned => {
                write!(f, "local store is unavailable after a panic in another writer")
            }
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Db(err) => Some(err),
            StorageError::Io(err) => Some(err),
            StorageError::Serialize(err) => Some(err),
            StorageError::InvalidKey(err) => Some(err),
            StorageError::Corrupt { .. } => None,
            StorageError::UnknownEntry(_) => None,
            StorageError::Poisoned => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        StorageError::Db(value)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Serialize(value)
    }
}

impl From<InvalidDate> for StorageError {
    fn from(value: InvalidDate) -> Self {
        StorageError::InvalidKey(value)
    }
}
