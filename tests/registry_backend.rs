//! Registration lifecycle tests: heartbeat gating on local health, the
//! registration failure policies, and the agent HTTP wire format.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use agrimesh_resilience::config::{RegistrationFailurePolicy, ResilienceConfig};
use agrimesh_resilience::discovery::agent::AgentBackend;
use agrimesh_resilience::discovery::DiscoveryBackend;
use agrimesh_resilience::health::{DependencyProbe, HealthChecker};
use agrimesh_resilience::types::RegistrationRecord;
use agrimesh_resilience::{ResilienceError, ResilienceResult, ServiceRegistry};

/// Backend fake that counts lifecycle calls and tracks heartbeat recency
/// the way a TTL check would.
struct CountingBackend {
    fail_register: bool,
    registered: AtomicUsize,
    heartbeats: AtomicUsize,
    deregistered: AtomicUsize,
    last_liveness: Mutex<Option<Instant>>,
}

impl CountingBackend {
    fn new(fail_register: bool) -> Self {
        Self {
            fail_register,
            registered: AtomicUsize::new(0),
            heartbeats: AtomicUsize::new(0),
            deregistered: AtomicUsize::new(0),
            last_liveness: Mutex::new(None),
        }
    }

    /// Whether the record would have expired: no registration or heartbeat
    /// within the last `ttl`.
    async fn expired(&self, ttl: Duration) -> bool {
        match *self.last_liveness.lock().await {
            Some(at) => at.elapsed() > ttl,
            None => true,
        }
    }
}

#[async_trait]
impl DiscoveryBackend for CountingBackend {
    async fn resolve(&self, _service_name: &str) -> ResilienceResult<Option<String>> {
        Ok(None)
    }

    async fn register(&self, _record: &RegistrationRecord) -> ResilienceResult<()> {
        if self.fail_register {
            return Err(ResilienceError::RegistryUnavailable(
                "connection refused".to_string(),
            ));
        }
        self.registered.fetch_add(1, Ordering::SeqCst);
        *self.last_liveness.lock().await = Some(Instant::now());
        Ok(())
    }

    async fn heartbeat(&self, _service_name: &str) -> ResilienceResult<()> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        *self.last_liveness.lock().await = Some(Instant::now());
        Ok(())
    }

    async fn deregister(&self, _service_name: &str) -> ResilienceResult<()> {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FlagProbe(Arc<AtomicBool>);

#[async_trait]
impl DependencyProbe for FlagProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> Result<(), String> {
        if self.0.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection pool exhausted".to_string())
        }
    }
}

fn registry_config() -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.service_name = "inventory".to_string();
    config.host = "10.0.0.7".to_string();
    config.port = 8080;
    config.registration.heartbeat_interval = Duration::from_millis(100);
    config.registration.ttl = Duration::from_millis(300);
    config.registration.shutdown_timeout = Duration::from_secs(1);
    config
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry_with(
    config: &ResilienceConfig,
    backend: Arc<CountingBackend>,
    health: HealthChecker,
) -> ServiceRegistry {
    init_logging();
    ServiceRegistry::new(
        config,
        backend as Arc<dyn DiscoveryBackend>,
        Arc::new(health),
    )
}

#[tokio::test(start_paused = true)]
async fn heartbeats_flow_while_healthy() {
    let config = registry_config();
    let backend = Arc::new(CountingBackend::new(false));
    let health = HealthChecker::new("inventory", &config.health);
    let registry = registry_with(&config, Arc::clone(&backend), health);

    registry.register().await.unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;

    assert_eq!(backend.registered.load(Ordering::SeqCst), 1);
    assert!(backend.heartbeats.load(Ordering::SeqCst) >= 4);
    assert!(!backend.expired(config.registration.ttl).await);

    registry.deregister().await;
    assert_eq!(backend.deregistered.load(Ordering::SeqCst), 1);

    // The task is stopped; no further heartbeats arrive.
    let after_shutdown = backend.heartbeats.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(backend.heartbeats.load(Ordering::SeqCst), after_shutdown);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_pause_while_down_and_resume_on_recovery() {
    let config = registry_config();
    let backend = Arc::new(CountingBackend::new(false));
    let healthy = Arc::new(AtomicBool::new(false));
    let health = HealthChecker::new("inventory", &config.health)
        .with_probe(Arc::new(FlagProbe(Arc::clone(&healthy))));
    let registry = registry_with(&config, Arc::clone(&backend), health);

    registry.register().await.unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;

    // Every tick found the instance DOWN, so the record ran out its TTL
    // at the backend.
    assert_eq!(backend.heartbeats.load(Ordering::SeqCst), 0);
    assert!(backend.expired(config.registration.ttl).await);

    healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(backend.heartbeats.load(Ordering::SeqCst) >= 1);
    assert!(!backend.expired(config.registration.ttl).await);

    registry.deregister().await;
}

#[tokio::test]
async fn fail_fast_policy_surfaces_registration_errors() {
    let mut config = registry_config();
    config.registration.on_registration_failure = RegistrationFailurePolicy::FailFast;
    let backend = Arc::new(CountingBackend::new(true));
    let health = HealthChecker::new("inventory", &config.health);
    let registry = registry_with(&config, Arc::clone(&backend), health);

    let result = registry.register().await;
    assert!(matches!(result, Err(ResilienceError::Registration(_))));
}

#[tokio::test(start_paused = true)]
async fn degrade_policy_continues_and_keeps_heartbeating() {
    let mut config = registry_config();
    config.registration.on_registration_failure = RegistrationFailurePolicy::Degrade;
    let backend = Arc::new(CountingBackend::new(true));
    let health = HealthChecker::new("inventory", &config.health);
    let registry = registry_with(&config, Arc::clone(&backend), health);

    registry.register().await.unwrap();

    // Heartbeats keep going out so a recovered backend picks the
    // instance back up.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(backend.heartbeats.load(Ordering::SeqCst) >= 1);

    registry.deregister().await;
}

#[tokio::test]
async fn registration_record_derives_the_health_url() {
    let config = registry_config();
    let backend = Arc::new(CountingBackend::new(false));
    let health = HealthChecker::new("inventory", &config.health);
    let registry = registry_with(&config, backend, health);

    let record = registry.record();
    assert_eq!(record.service_name, "inventory");
    assert_eq!(record.health_check_url, "http://10.0.0.7:8080/health");
    assert_eq!(record.ttl, Duration::from_millis(300));
}

#[tokio::test]
async fn agent_backend_speaks_the_agent_api() {
    let mut server = mockito::Server::new_async().await;

    let register = server
        .mock("PUT", "/v1/agent/service/register")
        .match_header("content-type", "application/json")
        .with_status(200)
        .create_async()
        .await;
    let pass = server
        .mock("PUT", "/v1/agent/check/pass/service:orders:ttl")
        .with_status(200)
        .create_async()
        .await;
    let deregister = server
        .mock("PUT", "/v1/agent/service/deregister/orders")
        .with_status(200)
        .create_async()
        .await;
    let catalog = server
        .mock("GET", "/v1/catalog/service/orders")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"ServiceAddress":"10.0.0.5","ServicePort":8080}]"#)
        .create_async()
        .await;

    let backend = AgentBackend::new(server.url(), None).unwrap();
    let record = RegistrationRecord {
        service_name: "orders".to_string(),
        host: "10.0.0.5".to_string(),
        port: 8080,
        health_check_url: "http://10.0.0.5:8080/health".to_string(),
        heartbeat_interval: Duration::from_secs(5),
        ttl: Duration::from_secs(15),
    };

    backend.register(&record).await.unwrap();
    backend.heartbeat("orders").await.unwrap();
    assert_eq!(
        backend.resolve("orders").await.unwrap(),
        Some("http://10.0.0.5:8080".to_string())
    );
    backend.deregister("orders").await.unwrap();

    register.assert_async().await;
    pass.assert_async().await;
    deregister.assert_async().await;
    catalog.assert_async().await;
}

#[tokio::test]
async fn agent_backend_reports_unknown_services_as_absent() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/catalog/service/ghost")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let backend = AgentBackend::new(server.url(), None).unwrap();
    assert_eq!(backend.resolve("ghost").await.unwrap(), None);
}

#[tokio::test]
async fn agent_backend_forwards_the_token() {
    let mut server = mockito::Server::new_async().await;
    let catalog = server
        .mock("GET", "/v1/catalog/service/orders")
        .match_header("X-Consul-Token", "s3cret")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .create_async()
        .await;

    let backend = AgentBackend::new(server.url(), Some("s3cret".to_string())).unwrap();
    backend.resolve("orders").await.unwrap();
    catalog.assert_async().await;
}

#[tokio::test]
async fn unreachable_agent_is_a_registry_error() {
    let backend = AgentBackend::new("http://127.0.0.1:1".to_string(), None).unwrap();
    let result = backend.resolve("orders").await;
    assert!(matches!(
        result,
        Err(ResilienceError::RegistryUnavailable(_))
    ));
}
