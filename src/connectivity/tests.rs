use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{
    Connectivity, ConnectivityMonitor, ConnectivityProbe, EventProbe, PollingProbe, Transition,
};
use crate::domain::record::DailyRecord;
use crate::engine::{DrainOutcome, SyncEngine};
use crate::queue::RetryPolicy;
use crate::remote::memory::MemoryRemote;
use crate::store::LocalStore;

fn open_store() -> (std::path::PathBuf, LocalStore) {
    let dir = std::env::temp_dir().join(format!("dailysync-connectivity-{}", Uuid::now_v7()));
    let store = LocalStore::open(&dir.join("state.sqlite").display().to_string())
        .expect("store should open");
    (dir, store)
}

fn save(store: &LocalStore, date: &str) {
    store
        .save_daily(&DailyRecord::new(date))
        .expect("save should succeed");
}

#[test]
fn set_reports_transitions() {
    let connectivity = Connectivity::new(false);
    let mut watcher = connectivity.subscribe();

    assert_eq!(connectivity.set(false), Transition::Unchanged);
    assert_eq!(connectivity.set(true), Transition::WentOnline);
    assert!(connectivity.is_online());
    assert!(*watcher.borrow_and_update());
    assert_eq!(connectivity.set(true), Transition::Unchanged);
    assert_eq!(connectivity.set(false), Transition::WentOffline);
}

#[tokio::test]
async fn reconnect_triggers_exactly_one_drain() {
    let (dir, store) = open_store();
    let remote = Arc::new(MemoryRemote::new());
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        RetryPolicy::default(),
    ));
    let monitor = ConnectivityMonitor::new(Arc::new(Connectivity::new(false)), engine);
    save(&store, "2024-01-15");

    assert!(monitor.observe(false).await.is_none());
    assert!(remote.calls().is_empty());

    match monitor.observe(true).await {
        Some(DrainOutcome::Completed(summary)) => assert_eq!(summary.pushed, 1),
        other => panic!("expected a drain on reconnect, got {other:?}"),
    }
    assert!(monitor.observe(true).await.is_none());
    assert_eq!(remote.calls(), vec!["daily:2024-01-15"]);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn run_follows_event_probe_until_closed() {
    let (dir, store) = open_store();
    let remote = Arc::new(MemoryRemote::new());
    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote.clone(),
        RetryPolicy::default(),
    ));
    let connectivity = Arc::new(Connectivity::new(false));
    let monitor = ConnectivityMonitor::new(connectivity.clone(), engine);
    save(&store, "2024-01-15");
    save(&store, "2024-01-16");

    let (events, mut probe) = EventProbe::channel(8);
    for online in [false, true, true, false] {
        events.send(online).await.expect("probe should accept events");
    }
    drop(events);

    monitor.run(&mut probe, Duration::from_secs(3600)).await;

    assert!(!connectivity.is_online());
    assert_eq!(
        remote.calls(),
        vec!["daily:2024-01-15", "daily:2024-01-16"]
    );
    assert_eq!(store.count_pending().expect("count"), 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn polling_probe_reports_remote_reachability() {
    let remote = Arc::new(MemoryRemote::new());
    let mut probe = PollingProbe::new(remote.clone(), Duration::from_millis(10));

    assert_eq!(probe.next_state().await, Some(true));
    remote.set_outage(true);
    assert_eq!(probe.next_state().await, Some(false));
}
