//! Background task that drains the queue whenever it makes sense to.
//!
//! Drains are triggered on start (when online with pending work), on every
//! offline to online transition, on a fixed interval while online, and on
//! explicit request through [`SyncManagerHandle::request_drain`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SyncClientConfig;
use crate::db::KeyValueStore;
use crate::state::SyncState;
use crate::sync::connectivity::Connectivity;
use crate::sync::queue::{DrainPolicy, DrainReport, SyncQueue};
use crate::sync::transport::Transport;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 32;

/// Events published by the sync manager for status surfaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotification {
    /// Connectivity came back; a drain follows
    BackOnline,
    WentOffline,
    /// A drain finished
    Drained(DrainReport),
}

/// Owns the drain loop configuration; consumed by [`OfflineSyncManager::spawn`].
pub struct OfflineSyncManager<S: KeyValueStore, T: Transport> {
    queue: Arc<SyncQueue<S>>,
    transport: Arc<T>,
    connectivity: Connectivity,
    drain_interval: Duration,
    policy: DrainPolicy,
}

impl<S, T> OfflineSyncManager<S, T>
where
    S: KeyValueStore + 'static,
    T: Transport + 'static,
{
    pub fn new(
        queue: Arc<SyncQueue<S>>,
        transport: Arc<T>,
        connectivity: Connectivity,
        config: &SyncClientConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            connectivity,
            drain_interval: config.drain_interval,
            policy: DrainPolicy::default(),
        }
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Start the drain loop on the current tokio runtime.
    pub fn spawn(self) -> SyncManagerHandle {
        let initial = if self.connectivity.is_online() {
            SyncState::Synced
        } else {
            SyncState::Offline
        };
        let (status_tx, status_rx) = watch::channel(initial);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let drain_requests = Arc::new(Notify::new());

        let task = tokio::spawn(self.run(
            status_tx,
            notifications.clone(),
            Arc::clone(&drain_requests),
            shutdown_rx,
        ));

        SyncManagerHandle {
            status: status_rx,
            notifications,
            drain_requests,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(
        self,
        status: watch::Sender<SyncState>,
        notifications: broadcast::Sender<SyncNotification>,
        drain_requests: Arc<Notify>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut online_rx = self.connectivity.subscribe();
        let mut online = *online_rx.borrow_and_update();

        if online && !self.queue.is_empty().await {
            self.drain(&status, &notifications).await;
        }

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.drain_interval,
            self.drain_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online_rx.borrow_and_update();
                    if now_online && !online {
                        tracing::info!("Back online. Syncing changes...");
                        let _ = notifications.send(SyncNotification::BackOnline);
                        online = true;
                        self.drain(&status, &notifications).await;
                    } else if !now_online && online {
                        tracing::info!("Offline. Changes will sync when connected.");
                        online = false;
                        status.send_replace(SyncState::Offline);
                        let _ = notifications.send(SyncNotification::WentOffline);
                    }
                }
                _ = ticker.tick() => {
                    if online && !self.queue.is_empty().await {
                        self.drain(&status, &notifications).await;
                    }
                }
                () = drain_requests.notified() => {
                    if online {
                        self.drain(&status, &notifications).await;
                    } else {
                        tracing::debug!("Drain requested while offline; waiting for connectivity");
                    }
                }
            }
        }

        if let Err(error) = self.queue.teardown().await {
            tracing::warn!("Failed to persist offline queue on shutdown: {}", error);
        }
        tracing::debug!("Sync manager stopped");
    }

    async fn drain(
        &self,
        status: &watch::Sender<SyncState>,
        notifications: &broadcast::Sender<SyncNotification>,
    ) {
        let previous = status.send_replace(SyncState::Syncing);
        match self.queue.process_queue(self.transport.as_ref(), self.policy).await {
            Ok(report) if report.skipped => {
                status.send_replace(previous);
            }
            Ok(report) => {
                status.send_replace(if report.remaining == 0 {
                    SyncState::Synced
                } else {
                    SyncState::Error
                });
                let _ = notifications.send(SyncNotification::Drained(report));
            }
            Err(error) => {
                tracing::warn!("Queue drain failed: {}", error);
                status.send_replace(SyncState::Error);
            }
        }
    }
}

/// Control surface for a running [`OfflineSyncManager`].
///
/// Dropping the handle stops the loop as well; `shutdown` additionally waits
/// for the queue to be flushed.
pub struct SyncManagerHandle {
    status: watch::Receiver<SyncState>,
    notifications: broadcast::Sender<SyncNotification>,
    drain_requests: Arc<Notify>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SyncManagerHandle {
    pub fn status(&self) -> SyncState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncState> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotification> {
        self.notifications.subscribe()
    }

    /// Ask for a drain at the next opportunity. Ignored while offline.
    pub fn request_drain(&self) {
        self.drain_requests.notify_one();
    }

    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(error) = (&mut self.task).await {
            tracing::warn!("Sync manager task ended abnormally: {}", error);
        }
    }
}
