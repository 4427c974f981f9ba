use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{mark_read_path, MARK_ALL_READ_PATH, UNREAD_PATH};
use crate::api::{ApiError, ApiRequest, AuthClient};
use crate::models::{Notification, NotificationId};

/// Shortest accepted poll interval; tokio intervals cannot be zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Running,
}

/// Run bookkeeping. `generation` changes on every start and stop so results
/// that belong to an earlier run are recognizably stale.
struct Control {
    generation: u64,
    cancel: Option<CancellationToken>,
}

pub struct NotificationPoller {
    client: AuthClient,
    interval: Duration,
    control: Mutex<Control>,
    unread: watch::Sender<Vec<Notification>>,
}

impl NotificationPoller {
    pub fn new(client: AuthClient, interval: Duration) -> Arc<Self> {
        let (unread, _) = watch::channel(Vec::new());
        Arc::new(Self {
            client,
            interval: interval.max(MIN_POLL_INTERVAL),
            control: Mutex::new(Control {
                generation: 0,
                cancel: None,
            }),
            unread,
        })
    }

    /// Begin polling: one fetch right away, then one per interval.
    /// Does nothing if already running.
    pub fn start(self: &Arc<Self>) {
        let (generation, cancel) = {
            let mut control = self.lock_control();
            if control.cancel.is_some() {
                return;
            }
            control.generation += 1;
            let cancel = CancellationToken::new();
            control.cancel = Some(cancel.clone());
            (control.generation, cancel)
        };

        info!(interval_secs = self.interval.as_secs(), "Notification poller started");
        tokio::spawn(Arc::clone(self).run(generation, cancel));
    }

    /// Stop polling and drop the cached list.
    ///
    /// Once this returns no further fetch is issued and no in-flight result
    /// is applied. Does nothing if already stopped.
    pub fn stop(&self) {
        let mut control = self.lock_control();
        let Some(cancel) = control.cancel.take() else {
            return;
        };
        control.generation += 1;
        cancel.cancel();
        self.unread.send_replace(Vec::new());
        info!("Notification poller stopped");
    }

    pub fn state(&self) -> PollerState {
        if self.lock_control().cancel.is_some() {
            PollerState::Running
        } else {
            PollerState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PollerState::Running
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Snapshot of the cached unread list, in server order.
    pub fn unread(&self) -> Vec<Notification> {
        self.unread.borrow().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.unread.borrow().len()
    }

    /// Watch the cached list; a new value is published on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.unread.subscribe()
    }

    /// Fetch the unread list without touching the cache.
    pub async fn fetch_unread(&self) -> Result<Vec<Notification>, ApiError> {
        let fetched: Vec<Notification> = self.client.get_json(UNREAD_PATH).await?;
        Ok(dedup_unread(fetched))
    }

    /// Poll immediately instead of waiting for the next tick.
    /// Skipped while stopped.
    pub async fn poll_now(&self) -> Result<(), ApiError> {
        let Some(generation) = self.running_generation() else {
            debug!("Poller stopped, skipping manual poll");
            return Ok(());
        };
        let fetched = self.fetch_unread().await?;
        self.apply(generation, |cache| *cache = fetched);
        Ok(())
    }

    /// Mark one notification read on the server, then drop it locally.
    pub async fn mark_read(&self, id: NotificationId) -> Result<(), ApiError> {
        let generation = self.current_generation();
        self.client
            .send_ack(ApiRequest::post(mark_read_path(id)))
            .await?;
        self.apply(generation, |cache| cache.retain(|n| n.id != id));
        Ok(())
    }

    /// Mark everything read on the server, then empty the local list.
    pub async fn mark_all_read(&self) -> Result<(), ApiError> {
        let generation = self.current_generation();
        self.client
            .send_ack(ApiRequest::post(MARK_ALL_READ_PATH))
            .await?;
        self.apply(generation, Vec::clear);
        Ok(())
    }

    async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        // First fetch goes out right away; the ticker only paces the rest.
        let first_tick = Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.fetch_unread() => result,
            };

            match result {
                Ok(fetched) => {
                    let count = fetched.len();
                    if self.apply(generation, |cache| *cache = fetched) {
                        debug!(unread = count, "Notifications polled");
                    }
                }
                Err(e) => debug!(error = %e, "Notification poll failed"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        debug!(generation, "Notification poll loop exited");
    }

    /// Apply `update` to the cache if the run it belongs to is still current.
    /// Runs under the control lock, so it cannot interleave with `stop`.
    fn apply(&self, generation: u64, update: impl FnOnce(&mut Vec<Notification>)) -> bool {
        let control = self.lock_control();
        if control.cancel.is_none() || control.generation != generation {
            debug!(generation, "Discarding stale notification update");
            return false;
        }
        self.unread.send_modify(update);
        true
    }

    fn current_generation(&self) -> u64 {
        self.lock_control().generation
    }

    fn running_generation(&self) -> Option<u64> {
        let control = self.lock_control();
        control.cancel.as_ref().map(|_| control.generation)
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keep unread items only, first occurrence of each id, server order.
fn dedup_unread(items: Vec<Notification>) -> Vec<Notification> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|n| !n.read && seen.insert(n.id))
        .collect()
}
