use std::time::Duration;

use rusqlite::params;
use time::macros::datetime;
use uuid::Uuid;

use super::{
    count_flagged, count_pending, enqueue, list_entries, mark_synced, pending_entries,
    prune_synced, record_failure, requeue_flagged, FailureDisposition, RetryPolicy,
    SyncOperation,
};
use crate::db::{open_connection, RecordKind};
use crate::domain::record::{DailyRecord, WeeklyRecord};
use crate::store::StorageError;

fn unique_db_path() -> String {
    std::env::temp_dir()
        .join(format!("dailysync-queue-{}.sqlite", Uuid::now_v7()))
        .display()
        .to_string()
}

fn cleanup_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}

fn daily(date: &str, points: i64) -> SyncOperation {
    let mut record = DailyRecord::new(date);
    record.point_balance = points;
    SyncOperation::SaveDailyData(record)
}

const NOW: &str = "2024-01-15T10:00:00Z";

#[test]
fn pending_entries_come_back_in_write_order() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");

    let first = enqueue(&conn, &daily("2024-01-16", 1), NOW).expect("enqueue");
    let week = WeeklyRecord::from_members("2024-01-14", Vec::new()).expect("week");
    let second = enqueue(&conn, &SyncOperation::SaveWeeklyData(week), NOW).expect("enqueue");
    let third = enqueue(&conn, &daily("2024-01-15", 2), NOW).expect("enqueue");

    let pending = pending_entries(&conn).expect("pending should load");
    let ids: Vec<i64> = pending.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![first, second, third]);
    assert_eq!(pending[0].operation.tag(), "saveDailyData");
    assert_eq!(pending[1].operation.tag(), "saveWeeklyData");
    assert_eq!(pending[1].operation.target().kind, RecordKind::Weekly);
    assert_eq!(pending[2].operation, daily("2024-01-15", 2));
    assert!(pending.iter().all(|entry| !entry.synced && entry.attempts == 0));
    assert_eq!(count_pending(&conn).expect("count"), 3);

    cleanup_db_files(&path);
}

#[test]
fn mark_synced_is_idempotent_and_rejects_unknown_ids() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let id = enqueue(&conn, &daily("2024-01-15", 1), NOW).expect("enqueue");

    assert!(mark_synced(&conn, id, NOW).expect("first mark"));
    assert!(!mark_synced(&conn, id, "2024-01-15T11:00:00Z").expect("second mark"));
    assert_eq!(count_pending(&conn).expect("count"), 0);

    let entries = list_entries(&conn, 10).expect("list");
    assert_eq!(entries[0].synced_at.as_deref(), Some(NOW));

    let err = mark_synced(&conn, id + 100, NOW).expect_err("unknown id should fail");
    assert!(matches!(err, StorageError::UnknownEntry(unknown) if unknown == id + 100));

    cleanup_db_files(&path);
}

#[test]
fn failures_back_off_then_flag_at_cap() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let id = enqueue(&conn, &daily("2024-01-15", 1), NOW).expect("enqueue");
    let policy = RetryPolicy {
        base_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(60),
        max_attempts: 3,
    };
    let now = datetime!(2024-01-15 10:00:00 UTC);

    let first = record_failure(&conn, id, "rejected", &policy, now).expect("failure");
    assert_eq!(
        first,
        FailureDisposition::RetryAt("2024-01-15T10:00:10Z".to_string())
    );
    let second = record_failure(&conn, id, "rejected", &policy, now).expect("failure");
    assert_eq!(
        second,
        FailureDisposition::RetryAt("2024-01-15T10:00:20Z".to_string())
    );

    let entry = &pending_entries(&conn).expect("pending")[0];
    assert_eq!(entry.attempts, 2);
    assert_eq!(entry.last_error.as_deref(), Some("rejected"));
    assert!(!entry.is_due(now));
    assert!(entry.is_due(datetime!(2024-01-15 10:00:20 UTC)));

    let third = record_failure(&conn, id, "still rejected", &policy, now).expect("failure");
    assert_eq!(third, FailureDisposition::Flagged);
    assert_eq!(count_flagged(&conn).expect("flagged"), 1);
    assert_eq!(count_pending(&conn).expect("pending"), 1);

    assert_eq!(requeue_flagged(&conn).expect("requeue"), 1);
    let entry = &pending_entries(&conn).expect("pending")[0];
    assert!(!entry.flagged);
    assert_eq!(entry.attempts, 0);
    assert!(entry.is_due(now));

    cleanup_db_files(&path);
}

#[test]
fn delay_doubles_and_caps() {
    let policy = RetryPolicy {
        base_delay: Duration::from_secs(5),
        max_delay: Duration::from_secs(30),
        max_attempts: 10,
    };
    assert_eq!(policy.delay_for(1), Duration::from_secs(5));
    assert_eq!(policy.delay_for(2), Duration::from_secs(10));
    assert_eq!(policy.delay_for(3), Duration::from_secs(20));
    assert_eq!(policy.delay_for(4), Duration::from_secs(30));
    assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
}

#[test]
fn prune_removes_only_old_synced_entries() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let old = enqueue(&conn, &daily("2024-01-10", 1), NOW).expect("enqueue");
    let recent = enqueue(&conn, &daily("2024-01-11", 1), NOW).expect("enqueue");
    let pending = enqueue(&conn, &daily("2024-01-12", 1), NOW).expect("enqueue");

    mark_synced(&conn, old, "2024-01-01T00:00:00Z").expect("mark");
    mark_synced(&conn, recent, "2024-01-20T00:00:00Z").expect("mark");

    let removed = prune_synced(&conn, "2024-01-10T00:00:00Z").expect("prune");
    assert_eq!(removed, 1);

    let ids: Vec<i64> = list_entries(&conn, 10)
        .expect("list")
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(ids, vec![recent, pending]);

    cleanup_db_files(&path);
}

#[test]
fn list_entries_returns_latest_window_oldest_first() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let ids: Vec<i64> = ["2024-01-14", "2024-01-15", "2024-01-16"]
        .iter()
        .map(|date| enqueue(&conn, &daily(date, 0), NOW).expect("enqueue"))
        .collect();

    let listed: Vec<i64> = list_entries(&conn, 2)
        .expect("list")
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(listed, vec![ids[1], ids[2]]);

    cleanup_db_files(&path);
}

fn flag_state(conn: &rusqlite::Connection, id: i64) -> (i64, Option<String>) {
    conn.query_row(
        "SELECT flagged, last_error FROM sync_queue WHERE seq = ?1",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .expect("queue row should be readable")
}

#[test]
fn tampered_payload_is_flagged_and_skipped() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let tampered = enqueue(&conn, &daily("2024-01-15", 1), NOW).expect("enqueue");
    let intact = enqueue(&conn, &daily("2024-01-16", 2), NOW).expect("enqueue");
    conn.execute(
        "UPDATE sync_queue SET payload = ?2 WHERE seq = ?1",
        params![tampered, "{\"date\":\"2024-01-15\",\"pointBalance\":99}"],
    )
    .expect("tamper");

    let pending = pending_entries(&conn).expect("intact entries should still load");
    let ids: Vec<i64> = pending.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![intact]);

    let (flagged, last_error) = flag_state(&conn, tampered);
    assert_eq!(flagged, 1);
    assert!(last_error
        .expect("reason should be recorded")
        .contains("checksum mismatch"));
    assert_eq!(count_pending(&conn).expect("count"), 2);
    assert_eq!(count_flagged(&conn).expect("flagged"), 1);

    let listed: Vec<i64> = list_entries(&conn, 10)
        .expect("list")
        .into_iter()
        .map(|entry| entry.id)
        .collect();
    assert_eq!(listed, vec![intact]);

    cleanup_db_files(&path);
}

#[test]
fn unknown_operation_tag_is_flagged_with_reason() {
    let path = unique_db_path();
    let conn = open_connection(&path).expect("connection should open");
    let id = enqueue(&conn, &daily("2024-01-15", 1), NOW).expect("enqueue");
    conn.execute(
        "UPDATE sync_queue SET operation = 'deleteEverything' WHERE seq = ?1",
        params![id],
    )
    .expect("tamper");

    assert!(pending_entries(&conn).expect("pending").is_empty());
    let (flagged, last_error) = flag_state(&conn, id);
    assert_eq!(flagged, 1);
    assert!(last_error
        .expect("reason should be recorded")
        .contains("deleteEverything"));

    cleanup_db_files(&path);
}
