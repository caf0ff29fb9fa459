//! Long-lived engine worker
//!
//! One background task owns every store and dispatches explicit commands
//! received over a channel; embedding applications talk to it through
//! [`EngineHandle`]. Fetches are spawned so slow networks never block the
//! command loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::cache::{CacheStore, ClearStats, EvictStats, request_key, store_name};
use crate::classify::Classifier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchInterceptor, FetchOutcome, FetchRequest};
use crate::gateway::Gateway;
use crate::notify::{ClientEvent, NotificationDispatcher, SubscriptionRecord};
use crate::queue::{MutationQueue, QueueKind};
use crate::quota::{QuotaManager, QuotaSnapshot};
use crate::sync::SyncScheduler;

/// Cadence of the engine's own housekeeping (deferred activation, quota
/// high-water checks).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Reply to a bulk pre-cache request.
#[derive(Debug, Clone)]
pub struct PrecacheReport {
    pub success: bool,
    pub error: Option<String>,
    pub cached: usize,
}

/// Commands the engine accepts.
pub enum Command {
    Fetch {
        request: FetchRequest,
        reply: oneshot::Sender<FetchOutcome>,
    },
    /// Force immediate activation of the configured cache version
    SkipWaiting {
        reply: oneshot::Sender<Result<usize>>,
    },
    GetVersion {
        reply: oneshot::Sender<String>,
    },
    /// Proactively fetch-and-store a list of URLs
    Precache {
        urls: Vec<String>,
        reply: oneshot::Sender<PrecacheReport>,
    },
    EnqueueMutation {
        kind: QueueKind,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<i64>>,
    },
    SyncNow,
    ConnectivityChanged(bool),
    Push {
        payload: Vec<u8>,
    },
    NotificationClick {
        target: Option<String>,
    },
    ClientAttach {
        id: u64,
        sender: mpsc::UnboundedSender<ClientEvent>,
    },
    ClientFocus {
        id: u64,
    },
    ClientDetach {
        id: u64,
    },
    Subscribe {
        endpoint: String,
        p256dh: String,
        auth: String,
        reply: oneshot::Sender<Result<SubscriptionRecord>>,
    },
    Unsubscribe {
        reply: oneshot::Sender<Option<SubscriptionRecord>>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<QuotaSnapshot>>,
    },
    Evict {
        target_bytes: u64,
        reply: oneshot::Sender<Result<EvictStats>>,
    },
    ClearCache {
        reply: oneshot::Sender<Result<ClearStats>>,
    },
    Shutdown,
}

/// The background engine. Construct with [`Engine::new`], then spawn
/// [`Engine::run`] and the returned scheduler.
pub struct Engine {
    version: String,
    active_store: String,
    activated: bool,
    high_water_percent: u8,
    warned_high_water: bool,
    cache: Arc<Mutex<CacheStore>>,
    queue: Arc<Mutex<MutationQueue>>,
    interceptor: Arc<FetchInterceptor>,
    quota: QuotaManager,
    dispatcher: NotificationDispatcher,
    gateway: Arc<dyn Gateway>,
    connectivity_tx: watch::Sender<bool>,
    sync_kick: mpsc::Sender<()>,
    commands: mpsc::Receiver<Command>,
}

impl Engine {
    /// Build the engine and its collaborators from configuration.
    ///
    /// The cache version comes from injected configuration so isolated
    /// instances (and tests) can run side by side. Activation of that
    /// version is deferred until the first maintenance tick or an
    /// explicit `SkipWaiting`.
    pub fn new(
        config: Config,
        gateway: Arc<dyn Gateway>,
    ) -> Result<(Engine, EngineHandle, SyncScheduler)> {
        let data_dir = config.data_dir()?;
        let cache = Arc::new(Mutex::new(CacheStore::open_at(&data_dir)?));
        let queue = Arc::new(Mutex::new(MutationQueue::open_at(&data_dir)?));

        let active_store = store_name(&config.cache_version);
        let classifier = Classifier::new(
            &config.api_prefix,
            &config.backend_url,
            &config.static_manifest,
        );
        let interceptor = Arc::new(FetchInterceptor::new(
            classifier,
            Arc::clone(&cache),
            Arc::clone(&gateway),
            active_store.clone(),
            config.offline_page.clone(),
        ));

        let quota = QuotaManager::new(
            data_dir,
            config.quota_bytes,
            config.high_water_percent,
            Arc::clone(&cache),
        );

        let (connectivity_tx, connectivity_rx) = watch::channel(true);
        let (kick_tx, kick_rx) = mpsc::channel(8);
        let scheduler = SyncScheduler::new(
            Arc::clone(&queue),
            Arc::clone(&gateway),
            config.backend_url.clone(),
            config.sync_interval(),
            connectivity_rx,
            kick_rx,
        );

        let (command_tx, command_rx) = mpsc::channel(64);

        let engine = Engine {
            version: config.cache_version.clone(),
            active_store,
            activated: false,
            high_water_percent: config.high_water_percent,
            warned_high_water: false,
            cache,
            queue,
            interceptor,
            quota,
            dispatcher: NotificationDispatcher::new(config.max_delivery_failures),
            gateway,
            connectivity_tx,
            sync_kick: kick_tx,
            commands: command_rx,
        };

        Ok((engine, EngineHandle { tx: command_tx }, scheduler))
    }

    /// Process commands until shutdown.
    pub async fn run(mut self) {
        let mut maintenance = tokio::time::interval_at(
            tokio::time::Instant::now() + MAINTENANCE_INTERVAL,
            MAINTENANCE_INTERVAL,
        );

        info!("engine running, cache version {}", self.version);
        loop {
            tokio::select! {
                _ = maintenance.tick() => self.maintenance(),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                }
            }
        }
        info!("engine stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Fetch { request, reply } => {
                // Each request is handled independently of the command loop
                let interceptor = Arc::clone(&self.interceptor);
                tokio::spawn(async move {
                    let outcome = interceptor.handle(&request).await;
                    let _ = reply.send(outcome);
                });
            }
            Command::SkipWaiting { reply } => {
                let _ = reply.send(self.activate());
            }
            Command::GetVersion { reply } => {
                let _ = reply.send(self.version.clone());
            }
            Command::Precache { urls, reply } => self.spawn_precache(urls, reply),
            Command::EnqueueMutation {
                kind,
                payload,
                reply,
            } => {
                let _ = reply.send(self.enqueue(kind, &payload));
            }
            Command::SyncNow => {
                let _ = self.sync_kick.try_send(());
            }
            Command::ConnectivityChanged(online) => {
                self.connectivity_tx.send_replace(online);
                if online {
                    let _ = self.sync_kick.try_send(());
                }
            }
            Command::Push { payload } => {
                self.dispatcher.deliver(&payload);
            }
            Command::NotificationClick { target } => self.dispatcher.click(target),
            Command::ClientAttach { id, sender } => self.dispatcher.attach(id, sender),
            Command::ClientFocus { id } => self.dispatcher.focus(id),
            Command::ClientDetach { id } => self.dispatcher.detach(id),
            Command::Subscribe {
                endpoint,
                p256dh,
                auth,
                reply,
            } => {
                let _ = reply.send(self.dispatcher.subscribe(&endpoint, &p256dh, &auth));
            }
            Command::Unsubscribe { reply } => {
                let _ = reply.send(self.dispatcher.unsubscribe());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.quota.snapshot());
            }
            Command::Evict { target_bytes, reply } => {
                let _ = reply.send(self.quota.evict(target_bytes));
            }
            Command::ClearCache { reply } => {
                let _ = reply.send(self.clear_cache());
            }
            Command::Shutdown => {}
        }
    }

    /// Activate the configured cache version, deleting every store that
    /// does not match it.
    fn activate(&mut self) -> Result<usize> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::Other("cache lock poisoned".to_string()))?;
        let deleted = cache.activate(&self.active_store)?;
        self.activated = true;
        info!("cache version {} active", self.version);
        Ok(deleted)
    }

    fn enqueue(&self, kind: QueueKind, payload: &serde_json::Value) -> Result<i64> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| Error::Other("queue lock poisoned".to_string()))?;
        // Storage failures surface to the caller: a silently lost
        // mutation is unacceptable.
        Ok(queue.enqueue(kind, payload)?)
    }

    fn clear_cache(&self) -> Result<ClearStats> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| Error::Other("cache lock poisoned".to_string()))?;
        Ok(cache.clear_all()?)
    }

    fn spawn_precache(&self, urls: Vec<String>, reply: oneshot::Sender<PrecacheReport>) {
        let gateway = Arc::clone(&self.gateway);
        let cache = Arc::clone(&self.cache);
        let store = self.active_store.clone();

        tokio::spawn(async move {
            let mut cached = 0usize;
            let mut error: Option<String> = None;

            for url in &urls {
                let result = match gateway.get(url).await {
                    Ok(response) if response.is_success() => {
                        let key = request_key("GET", url);
                        match cache.lock() {
                            Ok(guard) => guard
                                .put(&store, &key, &response)
                                .map_err(|e| e.to_string()),
                            Err(_) => Err("cache lock poisoned".to_string()),
                        }
                    }
                    Ok(response) => Err(format!("{} returned status {}", url, response.status)),
                    Err(err) => Err(format!("{}: {}", url, err)),
                };

                match result {
                    Ok(()) => cached += 1,
                    Err(message) => {
                        warn!("precache failed: {}", message);
                        if error.is_none() {
                            error = Some(message);
                        }
                    }
                }
            }

            let _ = reply.send(PrecacheReport {
                success: error.is_none(),
                error,
                cached,
            });
        });
    }

    fn maintenance(&mut self) {
        if !self.activated {
            if let Err(err) = self.activate() {
                warn!("deferred activation failed: {}", err);
            }
        }

        match self.quota.snapshot() {
            Ok(snapshot) => {
                let over = snapshot.percentage >= f64::from(self.high_water_percent.min(100));
                if over && !self.warned_high_water {
                    // Report pressure; eviction waits for explicit consent
                    warn!(
                        "storage at {:.1}% of quota ({} of {} bytes)",
                        snapshot.percentage, snapshot.used_bytes, snapshot.quota_bytes
                    );
                    self.dispatcher.broadcast_storage_warning(snapshot);
                }
                self.warned_high_water = over;
            }
            Err(err) => warn!("quota snapshot failed: {}", err),
        }
    }
}

/// Cloneable handle for talking to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Other("engine is not running".to_string()))
    }

    async fn recv<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|_| Error::Other("engine dropped the request".to_string()))
    }

    /// Route a request through the interceptor.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Fetch { request, reply }).await?;
        Self::recv(rx).await
    }

    /// Force immediate activation of the configured cache version.
    pub async fn skip_waiting(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SkipWaiting { reply }).await?;
        Self::recv(rx).await?
    }

    /// Currently configured cache version string.
    pub async fn version(&self) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetVersion { reply }).await?;
        Self::recv(rx).await
    }

    /// Bulk pre-cache a list of URLs.
    pub async fn precache(&self, urls: Vec<String>) -> Result<PrecacheReport> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Precache { urls, reply }).await?;
        Self::recv(rx).await
    }

    /// Queue a mutation for later replay.
    pub async fn enqueue_mutation(
        &self,
        kind: QueueKind,
        payload: serde_json::Value,
    ) -> Result<i64> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::EnqueueMutation {
            kind,
            payload,
            reply,
        })
        .await?;
        Self::recv(rx).await?
    }

    /// Ask the scheduler to drain now.
    pub async fn sync_now(&self) -> Result<()> {
        self.send(Command::SyncNow).await
    }

    /// Report a connectivity change.
    pub async fn set_connectivity(&self, online: bool) -> Result<()> {
        self.send(Command::ConnectivityChanged(online)).await
    }

    /// Deliver a raw push message.
    pub async fn push(&self, payload: Vec<u8>) -> Result<()> {
        self.send(Command::Push { payload }).await
    }

    /// Route a notification click.
    pub async fn notification_click(&self, target: Option<String>) -> Result<()> {
        self.send(Command::NotificationClick { target }).await
    }

    /// Attach a client surface.
    pub async fn client_attach(
        &self,
        id: u64,
        sender: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<()> {
        self.send(Command::ClientAttach { id, sender }).await
    }

    /// Mark a client surface as focused.
    pub async fn client_focus(&self, id: u64) -> Result<()> {
        self.send(Command::ClientFocus { id }).await
    }

    /// Detach a client surface.
    pub async fn client_detach(&self, id: u64) -> Result<()> {
        self.send(Command::ClientDetach { id }).await
    }

    /// Opt in to push delivery.
    pub async fn subscribe(
        &self,
        endpoint: String,
        p256dh: String,
        auth: String,
    ) -> Result<SubscriptionRecord> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            endpoint,
            p256dh,
            auth,
            reply,
        })
        .await?;
        Self::recv(rx).await?
    }

    /// Opt out of push delivery.
    pub async fn unsubscribe(&self) -> Result<Option<SubscriptionRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe { reply }).await?;
        Self::recv(rx).await
    }

    /// Current storage usage.
    pub async fn quota_snapshot(&self) -> Result<QuotaSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        Self::recv(rx).await?
    }

    /// Evict cache entries until the target is freed.
    pub async fn evict(&self, target_bytes: u64) -> Result<EvictStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Evict {
            target_bytes,
            reply,
        })
        .await?;
        Self::recv(rx).await?
    }

    /// Explicit user-triggered cache purge.
    pub async fn clear_cache(&self) -> Result<ClearStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ClearCache { reply }).await?;
        Self::recv(rx).await?
    }

    /// Stop the engine.
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }
}
