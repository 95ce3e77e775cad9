use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 2] = [
    Migration {
        version: 1,
        name: "baseline_local_store_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_data (
    record_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    checksum TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS weekly_data (
    record_key TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    checksum TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    record_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    checksum TEXT NOT NULL,
    created_at TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE TABLE IF NOT EXISTS user_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_synced_seq ON sync_queue(synced, seq);
"#,
    },
    Migration {
        version: 2,
        name: "sync_queue_retry_v1",
        sql: r#"
ALTER TABLE sync_queue ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE sync_queue ADD COLUMN next_attempt_at TEXT;
ALTER TABLE sync_queue ADD COLUMN last_error TEXT;
ALTER TABLE sync_queue ADD COLUMN flagged INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_sync_queue_synced_at ON sync_queue(synced, synced_at);
"#,
    },
];

pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_for_durability(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_durability(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "FULL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

/// Flushes the WAL into the main database file.
pub fn checkpoint(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
}

pub fn now_utc_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

/// Whole-second UTC timestamps, so stored values compare correctly as text.
pub fn format_rfc3339(value: OffsetDateTime) -> String {
    let value = value.to_offset(time::UtcOffset::UTC);
    value
        .replace_nanosecond(0)
        .unwrap_or(value)
        .format(&Rfc3339)
        .expect("RFC3339 formatting for UTC timestamp should never fail")
}

/// `value + delta`, clamped to the last instant RFC3339 can express.
pub fn saturating_add(value: OffsetDateTime, delta: Duration) -> OffsetDateTime {
    let latest = PrimitiveDateTime::new(
        Date::from_calendar_date(9999, Month::December, 31).unwrap_or(Date::MAX),
        Time::MIDNIGHT,
    )
    .assume_utc();
    time::Duration::try_from(delta)
        .ok()
        .and_then(|delta| value.checked_add(delta))
        .map_or(latest, |sum| sum.min(latest))
}

/// `value - delta`, clamped to the Unix epoch.
pub fn saturating_sub(value: OffsetDateTime, delta: Duration) -> OffsetDateTime {
    time::Duration::try_from(delta)
        .ok()
        .and_then(|delta| value.checked_sub(delta))
        .map_or(OffsetDateTime::UNIX_EPOCH, |diff| {
            diff.max(OffsetDateTime::UNIX_EPOCH)
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Daily,
    Weekly,
}

impl RecordKind {
    fn table(self) -> &'static str {
        match self {
            RecordKind::Daily => "daily_data",
            RecordKind::Weekly => "weekly_data",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Daily => "dailyData",
            RecordKind::Weekly => "weeklyData",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub key: String,
    pub payload: String,
    pub checksum: String,
    pub updated_at: String,
}

pub struct PutRecord<'a> {
    pub kind: RecordKind,
    pub key: &'a str,
    pub payload: &'a str,
    pub checksum: &'a str,
    pub updated_at: &'a str,
}

pub fn put_record(conn: &Connection, args: &PutRecord<'_>) -> Result<()> {
    let sql = format!(
        r#"
INSERT INTO {table} (record_key, payload, checksum, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(record_key) DO UPDATE SET
    payload = excluded.payload,
    checksum = excluded.checksum,
    updated_at = excluded.updated_at
"#,
        table = args.kind.table()
    );
    conn.execute(
        &sql,
        params![args.key, args.payload, args.checksum, args.updated_at],
    )?;
    Ok(())
}

pub fn get_record(conn: &Connection, kind: RecordKind, key: &str) -> Result<Option<StoredRecord>> {
    let sql = format!(
        "SELECT record_key, payload, checksum, updated_at FROM {} WHERE record_key = ?1",
        kind.table()
    );
    conn.query_row(&sql, params![key], stored_record_from_row)
        .optional()
}

pub fn list_records(conn: &Connection, kind: RecordKind) -> Result<Vec<StoredRecord>> {
    let sql = format!(
        "SELECT record_key, payload, checksum, updated_at FROM {} ORDER BY record_key ASC",
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(stored_record_from_row(row)?);
    }
    Ok(result)
}

/// Records whose key falls in `[from, to]`, ascending. ISO dates sort
/// lexically, so a plain text range is a date range.
pub fn list_records_between(
    conn: &Connection,
    kind: RecordKind,
    from: &str,
    to: &str,
) -> Result<Vec<StoredRecord>> {
    let sql = format!(
        r#"
SELECT record_key, payload, checksum, updated_at
FROM {}
WHERE record_key >= ?1 AND record_key <= ?2
ORDER BY record_key ASC
"#,
        kind.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![from, to])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(stored_record_from_row(row)?);
    }
    Ok(result)
}

fn stored_record_from_row(row: &rusqlite::Row<'_>) -> Result<StoredRecord> {
    Ok(StoredRecord {
        key: row.get(0)?,
        payload: row.get(1)?,
        checksum: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WipeSummary {
    pub daily_records: u64,
    pub weekly_records: u64,
    pub queue_entries: u64,
    pub settings: u64,
}

/// Deletes every record, queue entry, and setting. Schema and migration
/// history are kept so the store stays usable afterwards.
pub fn wipe_all_local_data(conn: &mut Connection) -> Result<WipeSummary> {
    let tx = conn.transaction()?;
    let summary = WipeSummary {
        daily_records: tx.execute("DELETE FROM daily_data", [])? as u64,
        weekly_records: tx.execute("DELETE FROM weekly_data", [])? as u64,
        queue_entries: tx.execute("DELETE FROM sync_queue", [])? as u64,
        settings: tx.execute("DELETE FROM user_settings", [])? as u64,
    };
    tx.execute("DELETE FROM meta WHERE key <> 'schema_version'", [])?;
    tx.commit()?;
    Ok(summary)
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: String,
    pub updated_at: String,
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM user_settings WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO user_settings (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
    value = excluded.value,
    updated_at = excluded.updated_at
"#,
        params![key, value, now_utc_rfc3339()],
    )?;
    Ok(())
}

pub fn list_settings(conn: &Connection) -> Result<Vec<SettingRecord>> {
    let mut stmt =
        conn.prepare("SELECT key, value, updated_at FROM user_settings ORDER BY key ASC")?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(SettingRecord {
            key: row.get(0)?,
            value: row.get(1)?,
            updated_at: row.get(2)?,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests;
