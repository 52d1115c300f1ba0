//! Discovery backend trait definition

use async_trait::async_trait;

use crate::types::RegistrationRecord;
use crate::ResilienceResult;

/// Operations a discovery backend must support.
///
/// These four operations are the entire boundary to the backend; anything
/// richer (watches, cross-datacenter queries) is out of scope.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Resolve a logical service name to a base URL.
    ///
    /// `Ok(None)` means the backend is reachable but does not know the name;
    /// `Err(RegistryUnavailable)` means the backend itself cannot be reached.
    async fn resolve(&self, service_name: &str) -> ResilienceResult<Option<String>>;

    /// Publish a registration record.
    async fn register(&self, record: &RegistrationRecord) -> ResilienceResult<()>;

    /// Refresh the liveness of a registered service.
    async fn heartbeat(&self, service_name: &str) -> ResilienceResult<()>;

    /// Withdraw a registration.
    async fn deregister(&self, service_name: &str) -> ResilienceResult<()>;
}
