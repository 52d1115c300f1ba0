//! Cached service discovery

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::DiscoveryConfig;
use crate::error::ResilienceError;
use crate::types::ServiceEndpoint;
use crate::ResilienceResult;

use super::backend::DiscoveryBackend;

/// Resolves logical service names to base URLs.
///
/// Resolved addresses are cached with a TTL and re-resolved lazily on the
/// next use after expiry. When the backend is unreachable, a stale cache
/// entry or a statically configured address is served instead, flagged in
/// the logs; the hard errors are reserved for names nobody knows.
pub struct ServiceDiscovery {
    backend: Arc<dyn DiscoveryBackend>,
    static_fallback: HashMap<String, String>,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, ServiceEndpoint>>,
}

impl ServiceDiscovery {
    /// Build discovery from configuration, creating the configured backend.
    pub fn from_config(config: &DiscoveryConfig) -> ResilienceResult<Self> {
        let backend = super::create_backend(config)?;
        Ok(Self::with_backend(
            backend,
            config.cache_ttl,
            config.static_services.clone(),
        ))
    }

    /// Build discovery around an existing backend.
    pub fn with_backend(
        backend: Arc<dyn DiscoveryBackend>,
        cache_ttl: Duration,
        static_fallback: HashMap<String, String>,
    ) -> Self {
        Self {
            backend,
            static_fallback,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a service name to a reachable base URL.
    pub async fn resolve(&self, service_name: &str) -> ResilienceResult<String> {
        // Fresh cache hit needs no backend round trip.
        let cached = {
            let cache = self.cache.read().await;
            cache.get(service_name).cloned()
        };
        if let Some(entry) = &cached {
            if entry.last_seen_at.elapsed() < self.cache_ttl {
                return Ok(entry.base_url.clone());
            }
        }

        match self.backend.resolve(service_name).await {
            Ok(Some(base_url)) => {
                let mut cache = self.cache.write().await;
                cache.insert(
                    service_name.to_string(),
                    ServiceEndpoint {
                        service_name: service_name.to_string(),
                        base_url: base_url.clone(),
                        last_seen_at: Instant::now(),
                        healthy: true,
                    },
                );
                debug!(service = service_name, %base_url, "resolved and cached");
                Ok(base_url)
            }
            Ok(None) => match self.static_fallback.get(service_name) {
                Some(base_url) => {
                    warn!(
                        service = service_name,
                        "backend does not know service, using static address"
                    );
                    Ok(base_url.clone())
                }
                None => Err(ResilienceError::ServiceNotFound {
                    service: service_name.to_string(),
                }),
            },
            Err(e) => {
                if let Some(entry) = cached {
                    warn!(
                        service = service_name,
                        error = %e,
                        "discovery backend unreachable, serving stale cached address"
                    );
                    let mut cache = self.cache.write().await;
                    if let Some(stored) = cache.get_mut(service_name) {
                        stored.healthy = false;
                    }
                    return Ok(entry.base_url);
                }
                if let Some(base_url) = self.static_fallback.get(service_name) {
                    warn!(
                        service = service_name,
                        error = %e,
                        "discovery backend unreachable, using static address"
                    );
                    return Ok(base_url.clone());
                }
                Err(e)
            }
        }
    }

    /// Evict a cached address immediately, forcing re-resolution on the
    /// next call. Invoked by the client after a connection failure.
    pub async fn invalidate(&self, service_name: &str) {
        let mut cache = self.cache.write().await;
        if cache.remove(service_name).is_some() {
            debug!(service = service_name, "cache entry invalidated");
        }
    }

    /// Current cache entry for a service, if any.
    pub async fn cached_endpoint(&self, service_name: &str) -> Option<ServiceEndpoint> {
        self.cache.read().await.get(service_name).cloned()
    }
}
