use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::db::{format_rfc3339, saturating_add, RecordKind};
use crate::domain::record::{DailyRecord, WeeklyRecord};
use crate::store::{payload_checksum, StorageError};

pub const SAVE_DAILY_DATA: &str = "saveDailyData";
pub const SAVE_WEEKLY_DATA: &str = "saveWeeklyData";

/// A mutation waiting to reach the remote store. Each variant carries the
/// full record snapshot at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    SaveDailyData(DailyRecord),
    SaveWeeklyData(WeeklyRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordRef {
    pub kind: RecordKind,
    pub key: String,
}

impl SyncOperation {
    pub fn tag(&self) -> &'static str {
        match self {
            SyncOperation::SaveDailyData(_) => SAVE_DAILY_DATA,
            SyncOperation::SaveWeeklyData(_) => SAVE_WEEKLY_DATA,
        }
    }

    pub fn record_key(&self) -> &str {
        match self {
            SyncOperation::SaveDailyData(record) => &record.date,
            SyncOperation::SaveWeeklyData(record) => &record.week_start,
        }
    }

    pub fn target(&self) -> RecordRef {
        let kind = match self {
            SyncOperation::SaveDailyData(_) => RecordKind::Daily,
            SyncOperation::SaveWeeklyData(_) => RecordKind::Weekly,
        };
        RecordRef {
            kind,
            key: self.record_key().to_string(),
        }
    }

    fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            SyncOperation::SaveDailyData(record) => serde_json::to_string(record),
            SyncOperation::SaveWeeklyData(record) => serde_json::to_string(record),
        }
    }

    fn decode(seq: i64, tag: &str, payload: &str) -> Result<Self, StorageError> {
        let corrupt = |message: String| StorageError::Corrupt {
            table: "sync_queue",
            key: seq.to_string(),
            message,
        };
        match tag {
            SAVE_DAILY_DATA => serde_json::from_str(payload)
                .map(SyncOperation::SaveDailyData)
                .map_err(|err| corrupt(format!("undecodable {} payload: {}", tag, err))),
            SAVE_WEEKLY_DATA => serde_json::from_str(payload)
                .map(SyncOperation::SaveWeeklyData)
                .map_err(|err| corrupt(format!("undecodable {} payload: {}", tag, err))),
            other => Err(corrupt(format!("unknown operation '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub operation: SyncOperation,
    pub timestamp: String,
    pub synced: bool,
    pub synced_at: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: Option<String>,
    pub last_error: Option<String>,
    pub flagged: bool,
}

impl SyncQueueEntry {
    /// Whether the backoff window has elapsed. Unparseable schedules count as due.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        match self.next_attempt_at.as_deref() {
            None => true,
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
                .map(|at| at <= now)
                .unwrap_or(true),
        }
    }

    pub fn view(&self) -> QueueEntryView {
        QueueEntryView {
            id: self.id,
            operation: self.operation.tag().to_string(),
            key: self.operation.record_key().to_string(),
            timestamp: self.timestamp.clone(),
            synced: self.synced,
            synced_at: self.synced_at.clone(),
            attempts: self.attempts,
            next_attempt_at: self.next_attempt_at.clone(),
            last_error: self.last_error.clone(),
            flagged: self.flagged,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryView {
    pub id: i64,
    pub operation: String,
    pub key: String,
    pub timestamp: String,
    pub synced: bool,
    pub synced_at: Option<String>,
    pub attempts: u32,
    pub next_attempt_at: Option<String>,
    pub last_error: Option<String>,
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(15 * 60),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay after the `attempts`-th consecutive failure.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(30);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryAt(String),
    Flagged,
}

const ENTRY_COLUMNS: &str = r#"
seq, operation, payload, checksum, created_at, synced, synced_at,
attempts, next_attempt_at, last_error, flagged
"#;

/// Appends an unsynced entry. Pass a `Transaction` to make the append part
/// of a larger atomic write.
pub fn enqueue(conn: &Connection, operation: &SyncOperation, now: &str) -> Result<i64, StorageError> {
    let payload = operation.payload_json()?;
    conn.execute(
        r#"
INSERT INTO sync_queue (operation, record_key, payload, checksum, created_at, synced)
VALUES (?1, ?2, ?3, ?4, ?5, 0)
"#,
        params![
            operation.tag(),
            operation.record_key(),
            payload,
            payload_checksum(&payload),
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Unsynced entries in write order, flagged ones included. Rows that fail
/// their checksum or no longer decode are flagged with the reason and left
/// out, so the rest of the queue keeps draining.
pub fn pending_entries(conn: &Connection) -> Result<Vec<SyncQueueEntry>, StorageError> {
    let sql = format!(
        "SELECT {} FROM sync_queue WHERE synced = 0 ORDER BY seq ASC",
        ENTRY_COLUMNS
    );
    let scan = query_entries(conn, &sql, [])?;
    for (seq, err) in &scan.corrupt {
        tracing::warn!(entry = seq, error = %err, "flagging corrupt sync queue entry");
        conn.execute(
            r#"
UPDATE sync_queue
SET flagged = 1, last_error = ?2, next_attempt_at = NULL
WHERE seq = ?1
"#,
            params![seq, err.to_string()],
        )?;
    }
    Ok(scan.entries)
}

/// The most recent `limit` readable entries of any state, oldest first.
pub fn list_entries(conn: &Connection, limit: u32) -> Result<Vec<SyncQueueEntry>, StorageError> {
    let sql = format!(
        r#"
SELECT * FROM (
    SELECT {} FROM sync_queue ORDER BY seq DESC LIMIT ?1
) ORDER BY seq ASC
"#,
        ENTRY_COLUMNS
    );
    let scan = query_entries(conn, &sql, params![limit])?;
    if !scan.corrupt.is_empty() {
        tracing::warn!(count = scan.corrupt.len(), "skipping corrupt sync queue entries");
    }
    Ok(scan.entries)
}

struct EntryScan {
    entries: Vec<SyncQueueEntry>,
    corrupt: Vec<(i64, StorageError)>,
}

fn query_entries<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<EntryScan, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut scan = EntryScan {
        entries: Vec::new(),
        corrupt: Vec::new(),
    };
    while let Some(row) = rows.next()? {
        let seq: i64 = row.get(0)?;
        let tag: String = row.get(1)?;
        let payload: String = row.get(2)?;
        let checksum: String = row.get(3)?;
        if payload_checksum(&payload) != checksum {
            scan.corrupt.push((
                seq,
                StorageError::Corrupt {
                    table: "sync_queue",
                    key: seq.to_string(),
                    message: "payload checksum mismatch".to_string(),
                },
            ));
            continue;
        }
        let operation = match SyncOperation::decode(seq, &tag, &payload) {
            Ok(operation) => operation,
            Err(err) => {
                scan.corrupt.push((seq, err));
                continue;
            }
        };
        let attempts: i64 = row.get(7)?;
        scan.entries.push(SyncQueueEntry {
            id: seq,
            operation,
            timestamp: row.get(4)?,
            synced: row.get::<_, i64>(5)? != 0,
            synced_at: row.get(6)?,
            attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
            next_attempt_at: row.get(8)?,
            last_error: row.get(9)?,
            flagged: row.get::<_, i64>(10)? != 0,
        });
    }
    Ok(scan)
}

pub fn count_pending(conn: &Connection) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE synced = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

pub fn count_flagged(conn: &Connection) -> Result<u64, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE synced = 0 AND flagged = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

/// Flips `synced`. Returns `false` when the entry was already synced; an
/// unknown id is an error.
pub fn mark_synced(conn: &Connection, id: i64, now: &str) -> Result<bool, StorageError> {
    let changed = conn.execute(
        r#"
UPDATE sync_queue
SET synced = 1, synced_at = ?2, next_attempt_at = NULL
WHERE seq = ?1 AND synced = 0
"#,
        params![id, now],
    )?;
    if changed > 0 {
        return Ok(true);
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT seq FROM sync_queue WHERE seq = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match exists {
        Some(_) => Ok(false),
        None => Err(StorageError::UnknownEntry(id)),
    }
}

/// Records a rejected push: bumps the attempt count and either schedules the
/// next attempt or flags the entry once the policy cap is reached.
pub fn record_failure(
    conn: &Connection,
    id: i64,
    error: &str,
    policy: &RetryPolicy,
    now: OffsetDateTime,
) -> Result<FailureDisposition, StorageError> {
    let attempts: Option<i64> = conn
        .query_row(
            "SELECT attempts FROM sync_queue WHERE seq = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let attempts = attempts.ok_or(StorageError::UnknownEntry(id))?;
    let attempts = u32::try_from(attempts.saturating_add(1)).unwrap_or(u32::MAX);

    if attempts >= policy.max_attempts {
        conn.execute(
            r#"
UPDATE sync_queue
SET attempts = ?2, last_error = ?3, flagged = 1, next_attempt_at = NULL
WHERE seq = ?1
"#,
            params![id, attempts, error],
        )?;
        return Ok(FailureDisposition::Flagged);
    }

    let next_raw = format_rfc3339(saturating_add(now, policy.delay_for(attempts)));
    conn.execute(
        r#"
UPDATE sync_queue
SET attempts = ?2, last_error = ?3, next_attempt_at = ?4
WHERE seq = ?1
"#,
        params![id, attempts, error, next_raw],
    )?;
    Ok(FailureDisposition::RetryAt(next_raw))
}

/// Unparks flagged entries so the next drain retries them from scratch.
pub fn requeue_flagged(conn: &Connection) -> Result<u64, StorageError> {
    let changed = conn.execute(
        r#"
UPDATE sync_queue
SET flagged = 0, attempts = 0, next_attempt_at = NULL
WHERE synced = 0 AND flagged = 1
"#,
        [],
    )?;
    Ok(changed as u64)
}

/// Deletes synced entries confirmed before `cutoff`. Pending entries are
/// never touched.
pub fn prune_synced(conn: &Connection, cutoff: &str) -> Result<u64, StorageError> {
    let removed = conn.execute(
        "DELETE FROM sync_queue WHERE synced = 1 AND synced_at IS NOT NULL AND synced_at < ?1",
        params![cutoff],
    )?;
    Ok(removed as u64)
}

#[cfg(test)]
mod tests;
