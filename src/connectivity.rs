use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::engine::{DrainMode, DrainOutcome, SyncEngine};
use crate::remote::RemoteStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    WentOnline,
    WentOffline,
}

/// Shared online/offline flag. Readers can either poll `is_online` or
/// subscribe for changes.
#[derive(Debug)]
pub struct Connectivity {
    state: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn set(&self, online: bool) -> Transition {
        let previous = self.state.send_replace(online);
        match (previous, online) {
            (false, true) => Transition::WentOnline,
            (true, false) => Transition::WentOffline,
            _ => Transition::Unchanged,
        }
    }
}

/// A source of connectivity observations. `None` means the source is
/// exhausted and monitoring should stop.
#[async_trait]
pub trait ConnectivityProbe: Send {
    async fn next_state(&mut self) -> Option<bool>;
}

/// Observations pushed by the host, for example a platform network callback.
pub struct EventProbe {
    events: mpsc::Receiver<bool>,
}

impl EventProbe {
    pub fn channel(buffer: usize) -> (mpsc::Sender<bool>, Self) {
        let (tx, events) = mpsc::channel(buffer.max(1));
        (tx, Self { events })
    }
}

#[async_trait]
impl ConnectivityProbe for EventProbe {
    async fn next_state(&mut self) -> Option<bool> {
        self.events.recv().await
    }
}

/// Checks remote reachability on a fixed period. The first check runs
/// immediately.
pub struct PollingProbe {
    remote: Arc<dyn RemoteStore>,
    ticker: Interval,
}

impl PollingProbe {
    pub fn new(remote: Arc<dyn RemoteStore>, period: Duration) -> Self {
        let mut ticker = interval(period.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { remote, ticker }
    }
}

#[async_trait]
impl ConnectivityProbe for PollingProbe {
    async fn next_state(&mut self) -> Option<bool> {
        self.ticker.tick().await;
        Some(self.remote.is_reachable().await)
    }
}

pub struct ConnectivityMonitor {
    connectivity: Arc<Connectivity>,
    engine: Arc<SyncEngine>,
}

impl ConnectivityMonitor {
    pub fn new(connectivity: Arc<Connectivity>, engine: Arc<SyncEngine>) -> Self {
        Self {
            connectivity,
            engine,
        }
    }

    /// Applies one observation. Only an offline to online transition starts
    /// a drain; repeated or unchanged observations do nothing.
    pub async fn observe(&self, online: bool) -> Option<DrainOutcome> {
        match self.connectivity.set(online) {
            Transition::WentOnline => {
                tracing::info!("connectivity restored; draining sync queue");
                Some(self.engine.drain(DrainMode::Automatic).await)
            }
            Transition::WentOffline => {
                tracing::info!("connectivity lost; queueing writes locally");
                None
            }
            Transition::Unchanged => None,
        }
    }

    /// Feeds probe observations until the probe is exhausted. While online,
    /// entries waiting out a backoff are retried every `retry_tick`.
    pub async fn run<P: ConnectivityProbe>(&self, probe: &mut P, retry_tick: Duration) {
        if self.connectivity.is_online() {
            self.engine.drain(DrainMode::Automatic).await;
        }

        let mut retry = interval(retry_tick.max(Duration::from_millis(10)));
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        retry.tick().await;

        loop {
            tokio::select! {
                observed = probe.next_state() => match observed {
                    Some(online) => {
                        self.observe(online).await;
                    }
                    None => {
                        tracing::debug!("connectivity probe closed; monitor stopping");
                        return;
                    }
                },
                _ = retry.tick() => {
                    if self.connectivity.is_online() {
                        self.engine.drain(DrainMode::Automatic).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
