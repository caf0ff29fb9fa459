//! Fetch interception and caching strategies
//!
//! Sits in front of all outbound traffic. GETs are classified and routed
//! to a strategy; non-GET requests pass straight through, and their
//! failures are the application layer's cue to enqueue a mutation.
//! Nothing here is fatal: every failure path degrades to cached data or
//! a synthesized offline response.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::cache::{CacheStore, CachedResponse, request_key};
use crate::classify::{Classifier, RequestClass};
use crate::gateway::Gateway;

/// An outbound request as seen by the engine.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    /// True for top-level page loads
    pub navigation: bool,
    /// JSON body for non-GET passthrough requests
    pub body: Option<serde_json::Value>,
}

impl FetchRequest {
    /// A plain GET.
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            navigation: false,
            body: None,
        }
    }

    /// A top-level page load.
    pub fn navigation(url: &str) -> Self {
        Self {
            navigation: true,
            ..Self::get(url)
        }
    }
}

/// Where the response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    /// Live network response
    Network,
    /// Cache hit (possibly stale)
    Cache,
    /// Pre-registered offline fallback page
    Fallback,
    /// Synthesized by the engine (offline 503)
    Synthesized,
}

/// A response plus its provenance, so callers can distinguish "no data"
/// from "stale data".
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub response: CachedResponse,
    pub served_from: ServedFrom,
}

impl FetchOutcome {
    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            served_from: ServedFrom::Network,
        }
    }

    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            served_from: ServedFrom::Cache,
        }
    }
}

/// Dispatches each intercepted request to the strategy for its class.
pub struct FetchInterceptor {
    classifier: Classifier,
    cache: Arc<Mutex<CacheStore>>,
    gateway: Arc<dyn Gateway>,
    /// Active store name, a pure function of the injected cache version
    store: String,
    /// Key of the offline fallback page inside the active store
    offline_page: String,
}

impl FetchInterceptor {
    pub fn new(
        classifier: Classifier,
        cache: Arc<Mutex<CacheStore>>,
        gateway: Arc<dyn Gateway>,
        store: String,
        offline_page: String,
    ) -> Self {
        Self {
            classifier,
            cache,
            gateway,
            store,
            offline_page,
        }
    }

    /// Handle one intercepted request.
    pub async fn handle(&self, request: &FetchRequest) -> FetchOutcome {
        let class = self
            .classifier
            .classify(&request.method, &request.url, request.navigation);

        match class {
            RequestClass::Bypass => self.passthrough(request).await,
            RequestClass::Navigation => self.network_first_page(request).await,
            RequestClass::Api => self.network_first_api(request).await,
            RequestClass::Static | RequestClass::Other => self.cache_first(request).await,
        }
    }

    /// Non-GET requests are never cached; forward and report failure as a
    /// synthesized offline response so the caller can enqueue.
    async fn passthrough(&self, request: &FetchRequest) -> FetchOutcome {
        match self
            .gateway
            .request(&request.method, &request.url, request.body.as_ref())
            .await
        {
            Ok(response) => FetchOutcome::network(response),
            Err(err) => {
                debug!("passthrough failed for {}: {}", request.url, err);
                synthesized_offline_api()
            }
        }
    }

    /// Static assets: serve a hit without touching the network; on a miss
    /// fetch and store in the background.
    async fn cache_first(&self, request: &FetchRequest) -> FetchOutcome {
        let key = request_key(&request.method, &request.url);

        if let Some(hit) = self.cache_get(&key) {
            debug!("cache hit: {}", request.url);
            return FetchOutcome::cache(hit);
        }

        match self.gateway.get(&request.url).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_detached(key, response.clone());
                }
                FetchOutcome::network(response)
            }
            Err(err) => {
                debug!("offline with no cached copy of {}: {}", request.url, err);
                synthesized_empty_offline()
            }
        }
    }

    /// Navigations: network first, offline fallback page on failure.
    async fn network_first_page(&self, request: &FetchRequest) -> FetchOutcome {
        match self.gateway.get(&request.url).await {
            Ok(response) => {
                if response.is_success() {
                    self.store_detached(request_key(&request.method, &request.url), response.clone());
                }
                FetchOutcome::network(response)
            }
            Err(err) => {
                debug!("navigation offline, serving fallback page: {}", err);
                let fallback_key = request_key("GET", &self.offline_page);
                match self.cache_get(&fallback_key) {
                    Some(page) => FetchOutcome {
                        response: page,
                        served_from: ServedFrom::Fallback,
                    },
                    None => synthesized_empty_offline(),
                }
            }
        }
    }

    /// API calls: network first with write-through, cached copy on
    /// failure, structured offline 503 when there is nothing cached.
    async fn network_first_api(&self, request: &FetchRequest) -> FetchOutcome {
        let key = request_key(&request.method, &request.url);

        match self.gateway.get(&request.url).await {
            Ok(response) => {
                if response.is_success() {
                    // Write-through before returning: the next offline
                    // read must see this response.
                    self.cache_put(&key, &response);
                }
                FetchOutcome::network(response)
            }
            Err(err) => match self.cache_get(&key) {
                Some(stale) => {
                    debug!("api offline, serving cached copy of {}", request.url);
                    FetchOutcome::cache(stale)
                }
                None => {
                    debug!("api offline with no cached copy of {}: {}", request.url, err);
                    synthesized_offline_api()
                }
            },
        }
    }

    fn cache_get(&self, key: &str) -> Option<CachedResponse> {
        let guard = self.cache.lock().ok()?;
        match guard.get(&self.store, key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!("cache read failed, treating as miss: {}", err);
                None
            }
        }
    }

    fn cache_put(&self, key: &str, response: &CachedResponse) {
        if let Ok(guard) = self.cache.lock()
            && let Err(err) = guard.put(&self.store, key, response)
        {
            warn!("cache write failed for {}: {}", key, err);
        }
    }

    /// Store without delaying the response to the caller.
    fn store_detached(&self, key: String, response: CachedResponse) {
        let cache = Arc::clone(&self.cache);
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Ok(guard) = cache.lock()
                && let Err(err) = guard.put(&store, &key, &response)
            {
                warn!("background cache write failed for {}: {}", key, err);
            }
        });
    }
}

/// Structured offline response for API callers.
fn synthesized_offline_api() -> FetchOutcome {
    let body = serde_json::json!({
        "error": "offline",
        "message": "The backend is unreachable and no cached copy exists",
    });

    FetchOutcome {
        response: CachedResponse {
            status: 503,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string().into_bytes(),
        },
        served_from: ServedFrom::Synthesized,
    }
}

/// Empty 503 for static assets with no cached copy.
fn synthesized_empty_offline() -> FetchOutcome {
    FetchOutcome {
        response: CachedResponse {
            status: 503,
            headers: Vec::new(),
            body: Vec::new(),
        },
        served_from: ServedFrom::Synthesized,
    }
}
