use super::{
    get_meta, get_record, get_setting, list_records, list_records_between, list_settings,
    open_connection, put_record, set_meta, set_setting, wipe_all_local_data, PutRecord,
    RecordKind, CURRENT_SCHEMA_VERSION,
};
use rusqlite::params;
use uuid::Uuid;

fn unique_db_path() -> String {
    std::env::temp_dir()
        .join(format!("dailysync-db-{}.sqlite", Uuid::now_v7()))
        .display()
        .to_string()
}

fn cleanup_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let candidate = format!("{path}{suffix}");
        let _ = std::fs::remove_file(candidate);
    }
}

fn table_exists(conn: &rusqlite::Connection, table_name: &str) -> bool {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
            params![table_name],
            |row| row.get(0),
        )
        .expect("table existence query should be readable");
    exists == 1
}

fn put(conn: &rusqlite::Connection, kind: RecordKind, key: &str, payload: &str) {
    put_record(
        conn,
        &PutRecord {
            kind,
            key,
            payload,
            checksum: "c",
            updated_at: "2024-01-15T00:00:00Z",
        },
    )
    .expect("record put should succeed");
}

#[test]
fn configures_connection_pragmas() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal_mode pragma should be readable");
    assert_eq!(journal_mode.to_uppercase(), "WAL");

    let synchronous: i64 = conn
        .query_row("PRAGMA synchronous;", [], |row| row.get(0))
        .expect("synchronous pragma should be readable");
    assert_eq!(synchronous, 2);

    let busy_timeout: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .expect("busy_timeout pragma should be readable");
    assert_eq!(busy_timeout, 5000);

    cleanup_db_files(&path);
}

#[test]
fn initializes_required_tables_and_schema_version() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    let tables = [
        "schema_migrations",
        "meta",
        "daily_data",
        "weekly_data",
        "sync_queue",
        "user_settings",
    ];
    for table in tables {
        assert!(
            table_exists(&conn, table),
            "expected table '{}' to exist",
            table
        );
    }

    let schema_version = get_meta(&conn, "schema_version")
        .expect("meta should be readable")
        .expect("schema version should be stored in meta table");
    assert_eq!(schema_version, CURRENT_SCHEMA_VERSION.to_string());

    cleanup_db_files(&path);
}

#[test]
fn reapplies_migrations_idempotently() {
    let path = unique_db_path();
    let conn_first = open_connection(&path).expect("first open should initialize schema");
    drop(conn_first);

    let conn_second = open_connection(&path).expect("second open should be idempotent");
    let applied_count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .expect("schema_migrations count should be queryable");
    assert_eq!(applied_count, CURRENT_SCHEMA_VERSION);

    cleanup_db_files(&path);
}

#[test]
fn put_record_upserts_single_row_per_key() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    put(&conn, RecordKind::Daily, "2024-01-15", "{\"v\":1}");
    put(&conn, RecordKind::Daily, "2024-01-15", "{\"v\":2}");

    let rows = list_records(&conn, RecordKind::Daily).expect("list should succeed");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, "{\"v\":2}");

    assert!(get_record(&conn, RecordKind::Weekly, "2024-01-15")
        .expect("weekly lookup should succeed")
        .is_none());

    cleanup_db_files(&path);
}

#[test]
fn lists_records_in_key_order_and_by_range() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    for key in ["2024-01-17", "2024-01-13", "2024-01-15", "2024-01-21"] {
        put(&conn, RecordKind::Daily, key, "{}");
    }

    let keys: Vec<String> = list_records(&conn, RecordKind::Daily)
        .expect("list should succeed")
        .into_iter()
        .map(|row| row.key)
        .collect();
    assert_eq!(
        keys,
        vec!["2024-01-13", "2024-01-15", "2024-01-17", "2024-01-21"]
    );

    let in_week: Vec<String> =
        list_records_between(&conn, RecordKind::Daily, "2024-01-14", "2024-01-20")
            .expect("range should succeed")
            .into_iter()
            .map(|row| row.key)
            .collect();
    assert_eq!(in_week, vec!["2024-01-15", "2024-01-17"]);

    cleanup_db_files(&path);
}

#[test]
fn wipe_clears_data_but_keeps_schema() {
    let path = unique_db_path();
    let mut conn = open_connection(&path).expect("connection should open");

    put(&conn, RecordKind::Daily, "2024-01-15", "{}");
    put(&conn, RecordKind::Weekly, "2024-01-14", "{}");
    set_setting(&conn, "theme", "dark").expect("setting should save");
    set_meta(&conn, "last_sync_at", "2024-01-15T00:00:00Z").expect("meta should save");

    let summary = wipe_all_local_data(&mut conn).expect("wipe should succeed");
    assert_eq!(summary.daily_records, 1);
    assert_eq!(summary.weekly_records, 1);
    assert_eq!(summary.settings, 1);

    assert!(list_records(&conn, RecordKind::Daily)
        .expect("list should succeed")
        .is_empty());
    assert!(get_meta(&conn, "last_sync_at")
        .expect("meta should be readable")
        .is_none());
    assert!(get_meta(&conn, "schema_version")
        .expect("meta should be readable")
        .is_some());

    cleanup_db_files(&path);
}

#[test]
fn settings_round_trip_and_list_sorted() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    set_setting(&conn, "reminders", "on").expect("setting should save");
    set_setting(&conn, "autosave", "30").expect("setting should save");
    set_setting(&conn, "reminders", "off").expect("setting should update");

    assert_eq!(
        get_setting(&conn, "reminders").expect("setting should load"),
        Some("off".to_string())
    );
    let keys: Vec<String> = list_settings(&conn)
        .expect("settings should list")
        .into_iter()
        .map(|setting| setting.key)
        .collect();
    assert_eq!(keys, vec!["autosave", "reminders"]);

    cleanup_db_files(&path);
}

#[test]
fn timestamp_arithmetic_clamps_instead_of_overflowing() {
    use std::time::Duration;

    use time::macros::datetime;

    use super::{format_rfc3339, saturating_add, saturating_sub};

    let now = datetime!(2024-01-15 10:00:00 UTC);
    assert_eq!(
        format_rfc3339(saturating_add(now, Duration::from_secs(10))),
        "2024-01-15T10:00:10Z"
    );
    assert_eq!(
        format_rfc3339(saturating_add(now, Duration::from_secs(u64::MAX))),
        "9999-12-31T00:00:00Z"
    );
    assert_eq!(
        format_rfc3339(saturating_sub(now, Duration::from_secs(u64::MAX))),
        "1970-01-01T00:00:00Z"
    );
}
