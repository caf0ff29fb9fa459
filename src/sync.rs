//! Background drain scheduler for the offline mutation queue
//!
//! Wakes on connectivity restore, on a coarse periodic tick, and on
//! explicit drain requests. Items of one kind are delivered strictly in
//! order — a failure parks the rest of that kind until the next trigger —
//! while distinct kinds drain concurrently.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::{debug, warn};
use tokio::sync::{mpsc, watch};

use crate::error::Error;
use crate::gateway::Gateway;
use crate::queue::{MutationQueue, QueueKind};

/// Drain rounds allowed per minute. Triggers beyond this are absorbed;
/// the queue's at-least-once contract tolerates the coarseness.
const DRAIN_ROUNDS_PER_MINUTE: u32 = 4;

/// Outcome of one drain round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: bool,
}

impl DrainReport {
    fn merge(self, other: DrainReport) -> DrainReport {
        DrainReport {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
            skipped: self.skipped && other.skipped,
        }
    }
}

/// Drains the mutation queue against the backend.
pub struct SyncScheduler {
    queue: Arc<Mutex<MutationQueue>>,
    gateway: Arc<dyn Gateway>,
    backend_url: String,
    interval: Duration,
    connectivity: watch::Receiver<bool>,
    kick: mpsc::Receiver<()>,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl SyncScheduler {
    pub fn new(
        queue: Arc<Mutex<MutationQueue>>,
        gateway: Arc<dyn Gateway>,
        backend_url: String,
        interval: Duration,
        connectivity: watch::Receiver<bool>,
        kick: mpsc::Receiver<()>,
    ) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(DRAIN_ROUNDS_PER_MINUTE).unwrap_or(NonZeroU32::MIN),
        );

        Self {
            queue,
            gateway,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            interval,
            connectivity,
            kick,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Run until every trigger source is gone.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would race engine startup
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.drain_all().await;
                }
                changed = self.connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *self.connectivity.borrow() {
                        debug!("connectivity restored, draining queues");
                        self.drain_all().await;
                    }
                }
                kicked = self.kick.recv() => {
                    match kicked {
                        Some(()) => {
                            self.drain_all().await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    /// One drain round across every queue kind.
    pub async fn drain_all(&self) -> DrainReport {
        if !*self.connectivity.borrow() {
            debug!("drain skipped: offline");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }

        if self.limiter.check().is_err() {
            debug!("drain skipped: rate limited");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }

        let (sync, reflections) = join(
            self.drain_kind(QueueKind::Sync),
            self.drain_kind(QueueKind::Reflections),
        )
        .await;

        sync.merge(reflections)
    }

    /// Drain one kind in creation order, stopping at the first failure so
    /// a later item never overtakes an earlier one.
    async fn drain_kind(&self, kind: QueueKind) -> DrainReport {
        let pending = match self.queue.lock() {
            Ok(queue) => match queue.list_pending(kind) {
                Ok(items) => items,
                Err(err) => {
                    warn!("could not list pending {} items: {}", kind, err);
                    return DrainReport::default();
                }
            },
            Err(_) => return DrainReport::default(),
        };

        if pending.is_empty() {
            return DrainReport::default();
        }

        debug!("draining {} pending {} items", pending.len(), kind);
        let endpoint = format!("{}{}", self.backend_url, kind.endpoint_path());
        let mut report = DrainReport::default();

        for item in pending {
            match self.gateway.post_json(&endpoint, &item.payload).await {
                Ok(response) if response.is_success() => {
                    if let Err(err) = self.confirm(item.id) {
                        warn!("delivered item {} but could not confirm: {}", item.id, err);
                    }
                    report.delivered += 1;
                }
                Ok(response) => {
                    debug!(
                        "backend rejected {} item {} with status {}",
                        kind, item.id, response.status
                    );
                    self.record_failure(item.id);
                    report.failed += 1;
                    break;
                }
                Err(err) => {
                    debug!("delivery of {} item {} failed: {}", kind, item.id, err);
                    self.record_failure(item.id);
                    report.failed += 1;
                    break;
                }
            }
        }

        report
    }

    fn confirm(&self, id: i64) -> Result<(), Error> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| Error::Other("queue lock poisoned".to_string()))?;
        queue.mark_synced(id)?;
        queue.remove(id)?;
        Ok(())
    }

    fn record_failure(&self, id: i64) {
        if let Ok(queue) = self.queue.lock()
            && let Err(err) = queue.bump_retry(id)
        {
            warn!("could not record retry for item {}: {}", id, err);
        }
    }
}
