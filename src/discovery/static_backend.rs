//! Static discovery backend fed from configuration

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

use crate::types::RegistrationRecord;
use crate::ResilienceResult;

use super::backend::DiscoveryBackend;

/// Discovery backend with a fixed service table.
///
/// Registration operations are accepted and ignored: a static table has no
/// liveness to maintain.
pub struct StaticBackend {
    services: HashMap<String, String>,
}

impl StaticBackend {
    pub fn new(services: HashMap<String, String>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl DiscoveryBackend for StaticBackend {
    async fn resolve(&self, service_name: &str) -> ResilienceResult<Option<String>> {
        Ok(self.services.get(service_name).cloned())
    }

    async fn register(&self, record: &RegistrationRecord) -> ResilienceResult<()> {
        debug!(service = %record.service_name, "static backend: registration is a no-op");
        Ok(())
    }

    async fn heartbeat(&self, service_name: &str) -> ResilienceResult<()> {
        debug!(service = service_name, "static backend: heartbeat is a no-op");
        Ok(())
    }

    async fn deregister(&self, service_name: &str) -> ResilienceResult<()> {
        debug!(service = service_name, "static backend: deregistration is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_configured_names_only() {
        let mut services = HashMap::new();
        services.insert("orders".to_string(), "http://orders.local:8080".to_string());
        let backend = StaticBackend::new(services);

        assert_eq!(
            backend.resolve("orders").await.unwrap(),
            Some("http://orders.local:8080".to_string())
        );
        assert_eq!(backend.resolve("crops").await.unwrap(), None);
    }
}
