//! Local health aggregation
//!
//! Named dependency probes rolled up into a single UP/DOWN verdict, served
//! at `GET /health` for load balancers and consulted internally by the
//! registry heartbeat.

use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::HealthConfig;
use crate::types::{HealthReport, HealthState};

/// One named dependency probe (e.g. a database ping).
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Name the dependency appears under in the report.
    fn name(&self) -> &str;

    /// Check the dependency; `Err` carries a reason for the logs.
    async fn check(&self) -> Result<(), String>;
}

/// Probe built from an async closure.
pub struct FnProbe {
    name: String,
    check: Box<
        dyn Fn() -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync,
    >,
}

impl FnProbe {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            check: Box::new(move || Box::pin(f())),
        }
    }
}

#[async_trait]
impl DependencyProbe for FnProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> Result<(), String> {
        (self.check)().await
    }
}

/// Aggregates dependency probes into one verdict.
///
/// Reading the verdict is side-effect free; probes run fresh on every
/// `report` call, each bounded by the configured probe timeout.
pub struct HealthChecker {
    service_name: String,
    probe_timeout: Duration,
    probes: tokio::sync::RwLock<Vec<Arc<dyn DependencyProbe>>>,
}

impl HealthChecker {
    /// Create a checker with no probes; a probeless service is always UP.
    pub fn new(service_name: impl Into<String>, config: &HealthConfig) -> Self {
        Self {
            service_name: service_name.into(),
            probe_timeout: config.probe_timeout,
            probes: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    /// Register a dependency probe; typically done once at boot, before
    /// the registry starts heartbeating.
    pub async fn add_probe(&self, probe: Arc<dyn DependencyProbe>) {
        self.probes.write().await.push(probe);
    }

    /// Builder-style variant of [`add_probe`](Self::add_probe).
    pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>) -> Self {
        self.probes.get_mut().push(probe);
        self
    }

    /// Run all probes and aggregate. Any dependency DOWN means DOWN.
    pub async fn report(&self) -> HealthReport {
        let mut dependencies = HashMap::new();
        let mut overall = HealthState::Up;

        let probes = self.probes.read().await.clone();
        for probe in &probes {
            let state = match tokio::time::timeout(self.probe_timeout, probe.check()).await {
                Ok(Ok(())) => HealthState::Up,
                Ok(Err(reason)) => {
                    warn!(probe = probe.name(), %reason, "dependency probe failed");
                    HealthState::Down
                }
                Err(_) => {
                    warn!(probe = probe.name(), "dependency probe timed out");
                    HealthState::Down
                }
            };
            if state == HealthState::Down {
                overall = HealthState::Down;
            }
            dependencies.insert(probe.name().to_string(), state);
        }

        HealthReport {
            status: overall,
            service: self.service_name.clone(),
            dependencies,
            timestamp: Utc::now(),
        }
    }
}

/// Router serving `GET /health`: `200` when UP, `503` when DOWN.
pub fn health_router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health_endpoint))
        .with_state(checker)
}

async fn health_endpoint(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let report = checker.report().await;
    let status = match report.status {
        HealthState::Up => StatusCode::OK,
        HealthState::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up_probe(name: &str) -> Arc<FnProbe> {
        Arc::new(FnProbe::new(name, || async { Ok(()) }))
    }

    fn down_probe(name: &str) -> Arc<FnProbe> {
        Arc::new(FnProbe::new(name, || async {
            Err("connection refused".to_string())
        }))
    }

    #[tokio::test]
    async fn all_probes_up_means_up() {
        let checker = HealthChecker::new("order-service", &HealthConfig::default())
            .with_probe(up_probe("database"))
            .with_probe(up_probe("cache"));

        let report = checker.report().await;
        assert_eq!(report.status, HealthState::Up);
        assert_eq!(report.service, "order-service");
        assert_eq!(report.dependencies.get("database"), Some(&HealthState::Up));
        assert_eq!(report.dependencies.get("cache"), Some(&HealthState::Up));
    }

    #[tokio::test]
    async fn any_probe_down_means_down() {
        let checker = HealthChecker::new("order-service", &HealthConfig::default())
            .with_probe(up_probe("database"))
            .with_probe(down_probe("cache"));

        let report = checker.report().await;
        assert_eq!(report.status, HealthState::Down);
        assert_eq!(report.dependencies.get("database"), Some(&HealthState::Up));
        assert_eq!(report.dependencies.get("cache"), Some(&HealthState::Down));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_counts_as_down() {
        let hung = Arc::new(FnProbe::new("database", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));
        let checker =
            HealthChecker::new("order-service", &HealthConfig::default()).with_probe(hung);

        let report = checker.report().await;
        assert_eq!(report.status, HealthState::Down);
    }

    #[tokio::test]
    async fn probeless_service_reports_up() {
        let checker = HealthChecker::new("order-service", &HealthConfig::default());
        assert_eq!(checker.report().await.status, HealthState::Up);
    }

    mod router {
        use super::*;
        use axum::body::Body;
        use axum::http::Request;
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        async fn hit_health(checker: HealthChecker) -> (StatusCode, HealthReport) {
            let router = health_router(Arc::new(checker));
            let response = router
                .oneshot(Request::get("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();

            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let report = serde_json::from_slice(&bytes).unwrap();
            (status, report)
        }

        #[tokio::test]
        async fn serves_200_with_up_body_when_all_probes_pass() {
            let checker = HealthChecker::new("order-service", &HealthConfig::default())
                .with_probe(up_probe("database"));

            let (status, report) = hit_health(checker).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(report.status, HealthState::Up);
            assert_eq!(report.service, "order-service");
            assert_eq!(report.dependencies.get("database"), Some(&HealthState::Up));
        }

        #[tokio::test]
        async fn serves_503_with_down_body_when_a_probe_fails() {
            let checker = HealthChecker::new("order-service", &HealthConfig::default())
                .with_probe(up_probe("database"))
                .with_probe(down_probe("cache"));

            let (status, report) = hit_health(checker).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(report.status, HealthState::Down);
            assert_eq!(report.dependencies.get("cache"), Some(&HealthState::Down));
        }
    }
}
