//! Resilient inter-service communication for the AgriMesh platform
//!
//! Every AgriMesh service calls its peers through this layer: logical names
//! are resolved through a cached service discovery, each target is guarded
//! by its own circuit breaker, transient failures are retried under a
//! shared deadline, and each instance announces and withdraws its own
//! availability with a health-gated heartbeat.

pub mod breaker;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod registry;
pub mod retry;
pub mod transport;
pub mod types;

use std::sync::Arc;

// Re-export main types
pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{ResilientHttpClient, ServiceClient};
pub use config::ResilienceConfig;
pub use discovery::ServiceDiscovery;
pub use error::ResilienceError;
pub use health::{DependencyProbe, FnProbe, HealthChecker};
pub use registry::ServiceRegistry;
pub use transport::{HttpTransport, ServiceResponse};
pub use types::*;

/// Result type for resilience-layer operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Crate version information
pub const LAYER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the local health endpoint
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Header carrying the correlation id across service hops
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Header forwarded unmodified on every proxied call
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Everything one service instance needs from this layer, wired together.
pub struct ResilienceLayer {
    pub client: Arc<ResilientHttpClient>,
    pub discovery: Arc<ServiceDiscovery>,
    pub registry: Arc<ServiceRegistry>,
    pub health: Arc<HealthChecker>,
}

/// Initialize the resilience layer for one service instance.
///
/// Builds the discovery backend once and shares it between name resolution
/// and self-registration. Registration itself is left to the caller
/// (`layer.registry.register()`) so services can attach health probes
/// first.
pub fn init(config: &ResilienceConfig) -> ResilienceResult<ResilienceLayer> {
    config.validate()?;
    tracing::info!(
        service = %config.service_name,
        version = LAYER_VERSION,
        "initializing resilience layer"
    );

    let backend = discovery::create_backend(&config.discovery)?;
    let discovery = Arc::new(ServiceDiscovery::with_backend(
        Arc::clone(&backend),
        config.discovery.cache_ttl,
        config.discovery.static_services.clone(),
    ));
    let health = Arc::new(HealthChecker::new(&config.service_name, &config.health));
    let client = Arc::new(ResilientHttpClient::new(config, Arc::clone(&discovery))?);
    let registry = Arc::new(ServiceRegistry::new(
        config,
        backend,
        Arc::clone(&health),
    ));

    Ok(ResilienceLayer {
        client,
        discovery,
        registry,
        health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_wires_all_components() {
        let mut config = ResilienceConfig::default();
        config.discovery.backend = config::DiscoveryBackendKind::Static;
        config
            .discovery
            .static_services
            .insert("orders".to_string(), "http://orders.local:8080".to_string());

        let layer = init(&config).unwrap();
        assert_eq!(layer.registry.record().service_name, "agrimesh-service");
    }

    #[test]
    fn init_rejects_invalid_config() {
        let mut config = ResilienceConfig::default();
        config.breaker.sliding_window_size = 0;
        assert!(init(&config).is_err());
    }
}
