//! Self-registration with the discovery backend
//!
//! Publishes this instance's registration record, keeps it alive with a
//! health-gated heartbeat task, and withdraws it on graceful shutdown. An
//! instance whose local health turns DOWN simply stops heartbeating and
//! lets the record expire at the backend.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{RegistrationFailurePolicy, ResilienceConfig};
use crate::discovery::DiscoveryBackend;
use crate::error::ResilienceError;
use crate::health::HealthChecker;
use crate::types::{HealthState, RegistrationRecord};
use crate::{ResilienceResult, DEFAULT_HEALTH_PATH};

/// Registers this service instance and maintains its liveness.
pub struct ServiceRegistry {
    record: RegistrationRecord,
    backend: Arc<dyn DiscoveryBackend>,
    health: Arc<HealthChecker>,
    failure_policy: RegistrationFailurePolicy,
    shutdown_timeout: Duration,
    heartbeat_handle: RwLock<Option<JoinHandle<()>>>,
    shutdown_flag: Arc<RwLock<bool>>,
}

impl ServiceRegistry {
    /// Build a registry for this instance from configuration.
    pub fn new(
        config: &ResilienceConfig,
        backend: Arc<dyn DiscoveryBackend>,
        health: Arc<HealthChecker>,
    ) -> Self {
        let record = RegistrationRecord {
            service_name: config.service_name.clone(),
            host: config.host.clone(),
            port: config.port,
            health_check_url: format!(
                "http://{}:{}{}",
                config.host, config.port, DEFAULT_HEALTH_PATH
            ),
            heartbeat_interval: config.registration.heartbeat_interval,
            ttl: config.registration.ttl,
        };

        Self {
            record,
            backend,
            health,
            failure_policy: config.registration.on_registration_failure,
            shutdown_timeout: config.registration.shutdown_timeout,
            heartbeat_handle: RwLock::new(None),
            shutdown_flag: Arc::new(RwLock::new(false)),
        }
    }

    /// The record this registry publishes.
    pub fn record(&self) -> &RegistrationRecord {
        &self.record
    }

    /// Publish the registration record and start the heartbeat task.
    ///
    /// On registration failure the configured policy applies: `FailFast`
    /// returns the error so the process can exit nonzero; `Degrade` logs
    /// and continues, leaving peers to their static fallback tables. The
    /// heartbeat task is started either way so a recovered backend picks
    /// the instance back up.
    pub async fn register(&self) -> ResilienceResult<()> {
        match self.backend.register(&self.record).await {
            Ok(()) => {
                info!(service = %self.record.service_name, "service registered");
            }
            Err(e) => match self.failure_policy {
                RegistrationFailurePolicy::FailFast => {
                    return Err(ResilienceError::Registration(format!(
                        "registration of {} failed: {}",
                        self.record.service_name, e
                    )));
                }
                RegistrationFailurePolicy::Degrade => {
                    warn!(
                        service = %self.record.service_name,
                        error = %e,
                        "registration failed, continuing undiscoverable"
                    );
                }
            },
        }

        self.start_heartbeat().await;
        Ok(())
    }

    async fn start_heartbeat(&self) {
        let mut handle_slot = self.heartbeat_handle.write().await;
        if handle_slot.is_some() {
            warn!("heartbeat task is already running");
            return;
        }

        let backend = Arc::clone(&self.backend);
        let health = Arc::clone(&self.health);
        let shutdown_flag = Arc::clone(&self.shutdown_flag);
        let service_name = self.record.service_name.clone();
        let heartbeat_interval = self.record.heartbeat_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(heartbeat_interval);
            loop {
                ticker.tick().await;

                if *shutdown_flag.read().await {
                    break;
                }

                // An unhealthy instance withholds its heartbeat so the
                // backend expires the record after the TTL.
                let report = health.report().await;
                if report.status != HealthState::Up {
                    warn!(service = %service_name, "local health DOWN, skipping heartbeat");
                    continue;
                }

                match backend.heartbeat(&service_name).await {
                    Ok(()) => debug!(service = %service_name, "heartbeat sent"),
                    Err(e) => warn!(service = %service_name, error = %e, "heartbeat failed"),
                }
            }
            info!(service = %service_name, "heartbeat task stopped");
        });

        *handle_slot = Some(handle);
    }

    /// Stop heartbeating and withdraw the registration, best effort,
    /// bounded by the shutdown timeout.
    pub async fn deregister(&self) {
        {
            let mut flag = self.shutdown_flag.write().await;
            *flag = true;
        }

        if let Some(handle) = self.heartbeat_handle.write().await.take() {
            handle.abort();
        }

        let deregistration = self.backend.deregister(&self.record.service_name);
        match tokio::time::timeout(self.shutdown_timeout, deregistration).await {
            Ok(Ok(())) => info!(service = %self.record.service_name, "service deregistered"),
            Ok(Err(e)) => warn!(
                service = %self.record.service_name,
                error = %e,
                "deregistration failed, record will expire by TTL"
            ),
            Err(_) => warn!(
                service = %self.record.service_name,
                "deregistration timed out, record will expire by TTL"
            ),
        }
    }

    /// Wait for SIGTERM/SIGINT, then deregister. Intended for use with
    /// `axum::serve(...).with_graceful_shutdown(...)` so the server stops
    /// accepting connections while the record is withdrawn.
    pub async fn run_until_shutdown(&self) {
        shutdown_signal().await;
        self.deregister().await;
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        if let Ok(handle_slot) = self.heartbeat_handle.try_read() {
            if let Some(handle) = handle_slot.as_ref() {
                handle.abort();
            }
        }
    }
}

/// Resolve when the process receives SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, shutting down");
        }
        _ = terminate => {
            info!("SIGTERM received, shutting down");
        }
    }
}
