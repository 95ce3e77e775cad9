use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use super::{RemoteError, RemoteStore};
use crate::domain::record::{DailyRecord, WeeklyRecord};

/// In-process remote with failure injection for engine and service tests.
pub struct MemoryRemote {
    daily: Mutex<BTreeMap<String, DailyRecord>>,
    weekly: Mutex<BTreeMap<String, WeeklyRecord>>,
    calls: Mutex<Vec<String>>,
    rejecting: Mutex<HashSet<String>>,
    outage: AtomicBool,
    paused: AtomicBool,
    gate: Semaphore,
    pub push_started: Notify,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            daily: Mutex::new(BTreeMap::new()),
            weekly: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            rejecting: Mutex::new(HashSet::new()),
            outage: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            gate: Semaphore::new(0),
            push_started: Notify::new(),
        }
    }

    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Rejects every push for `key` until cleared.
    pub fn reject(&self, key: &str) {
        self.rejecting
            .lock()
            .expect("rejecting lock")
            .insert(key.to_string());
    }

    pub fn accept(&self, key: &str) {
        self.rejecting.lock().expect("rejecting lock").remove(key);
    }

    /// Holds every push after it is logged until `release` is called.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }

    /// Every push attempt in arrival order, as `kind:key`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn daily(&self, date: &str) -> Option<DailyRecord> {
        self.daily.lock().expect("daily lock").get(date).cloned()
    }

    pub fn weekly(&self, week_start: &str) -> Option<WeeklyRecord> {
        self.weekly.lock().expect("weekly lock").get(week_start).cloned()
    }

    pub fn insert_daily(&self, record: DailyRecord) {
        self.daily
            .lock()
            .expect("daily lock")
            .insert(record.date.clone(), record);
    }

    pub fn insert_weekly(&self, record: WeeklyRecord) {
        self.weekly
            .lock()
            .expect("weekly lock")
            .insert(record.week_start.clone(), record);
    }

    async fn admit(&self, kind: &str, key: &str) -> Result<(), RemoteError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory remote is down".to_string()));
        }
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{}:{}", kind, key));
        self.push_started.notify_one();
        if self.paused.load(Ordering::SeqCst) {
            // The permit goes straight back, so one release frees every waiter.
            let _permit = self.gate.acquire().await;
        }
        if self.rejecting.lock().expect("rejecting lock").contains(key) {
            return Err(RemoteError::Rejected {
                key: key.to_string(),
                message: "rejected by test".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn upsert_daily(&self, record: &DailyRecord) -> Result<(), RemoteError> {
        self.admit("daily", &record.date).await?;
        self.insert_daily(record.clone());
        Ok(())
    }

    async fn upsert_weekly(&self, record: &WeeklyRecord) -> Result<(), RemoteError> {
        self.admit("weekly", &record.week_start).await?;
        self.insert_weekly(record.clone());
        Ok(())
    }

    async fn fetch_daily(&self, date: &str) -> Result<Option<DailyRecord>, RemoteError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory remote is down".to_string()));
        }
        Ok(self.daily(date))
    }

    async fn fetch_weekly(&self, week_start: &str) -> Result<Option<WeeklyRecord>, RemoteError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("memory remote is down".to_string()));
        }
        Ok(self.weekly(week_start))
    }

    async fn is_reachable(&self) -> bool {
        !self.outage.load(Ordering::SeqCst)
    }
}
