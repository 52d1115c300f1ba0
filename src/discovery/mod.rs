//! Service discovery: name resolution with caching and pluggable backends

pub mod agent;
pub mod backend;
pub mod core;
pub mod static_backend;

use std::sync::Arc;

use crate::config::{DiscoveryBackendKind, DiscoveryConfig};
use crate::ResilienceResult;

pub use backend::DiscoveryBackend;
pub use core::ServiceDiscovery;

/// Create the discovery backend named by configuration.
pub fn create_backend(config: &DiscoveryConfig) -> ResilienceResult<Arc<dyn DiscoveryBackend>> {
    match config.backend {
        DiscoveryBackendKind::Agent => Ok(Arc::new(agent::AgentBackend::new(
            config.agent_endpoint.clone(),
            config.agent_token.clone(),
        )?)),
        DiscoveryBackendKind::Static => Ok(Arc::new(static_backend::StaticBackend::new(
            config.static_services.clone(),
        ))),
    }
}
