//! Request classification for caching policy
//!
//! Maps an outbound request to the policy class that decides which caching
//! strategy handles it. Classification is pure so it can be tested without
//! any network or storage.

use std::collections::HashSet;

use url::Url;

/// Policy class for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Non-idempotent request; never cached
    Bypass,
    /// Top-level page load
    Navigation,
    /// Backend data call
    Api,
    /// Asset listed in the static manifest
    Static,
    /// Anything else; cached best-effort like a static asset
    Other,
}

impl RequestClass {
    /// All request classes.
    pub const ALL: [RequestClass; 5] = [
        RequestClass::Bypass,
        RequestClass::Navigation,
        RequestClass::Api,
        RequestClass::Static,
        RequestClass::Other,
    ];

    /// True when responses in this class may be stored.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, RequestClass::Bypass)
    }
}

/// Classifier configured from the engine config.
///
/// Holds the API prefix, the backend host, and the static manifest; it is
/// injected into the interceptor at construction so isolated instances can
/// classify against different backends.
#[derive(Debug, Clone)]
pub struct Classifier {
    api_prefix: String,
    backend_host: Option<String>,
    static_manifest: HashSet<String>,
}

impl Classifier {
    /// Create a classifier for a backend URL and static manifest.
    pub fn new(api_prefix: &str, backend_url: &str, static_manifest: &[String]) -> Self {
        let backend_host = Url::parse(backend_url)
            .ok()
            .and_then(|u| u.host_str().map(String::from));

        let mut manifest = HashSet::new();
        for entry in static_manifest {
            manifest.insert(entry.clone());
            // Absolute manifest entries also match by path
            if let Ok(parsed) = Url::parse(entry) {
                manifest.insert(parsed.path().to_string());
            }
        }

        Self {
            api_prefix: api_prefix.to_string(),
            backend_host,
            static_manifest: manifest,
        }
    }

    /// Classify a request. Rules apply in priority order: non-GET methods
    /// bypass caching entirely, then navigation, then API (prefix or
    /// backend host), then the static manifest, then `Other`.
    pub fn classify(&self, method: &str, request_url: &str, navigation: bool) -> RequestClass {
        if !method.eq_ignore_ascii_case("GET") {
            return RequestClass::Bypass;
        }

        if navigation {
            return RequestClass::Navigation;
        }

        let parsed = match Url::parse(request_url) {
            Ok(parsed) => parsed,
            // Relative URLs (no scheme/host) classify by path alone;
            // anything unparseable falls through to the least-aggressive
            // policy instead of failing.
            Err(_) => {
                if request_url.starts_with(&self.api_prefix) {
                    return RequestClass::Api;
                }
                if self.static_manifest.contains(request_url) {
                    return RequestClass::Static;
                }
                return RequestClass::Other;
            }
        };

        if parsed.path().starts_with(&self.api_prefix) {
            return RequestClass::Api;
        }

        if let Some(host) = parsed.host_str()
            && Some(host) == self.backend_host.as_deref()
        {
            return RequestClass::Api;
        }

        if self.static_manifest.contains(request_url)
            || self.static_manifest.contains(parsed.path())
        {
            return RequestClass::Static;
        }

        RequestClass::Other
    }
}
