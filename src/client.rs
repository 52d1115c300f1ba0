//! Resilient HTTP client
//!
//! The single entry point services use to call a peer: discovery, breaker
//! admission, retry-wrapped transport, and outcome feedback composed behind
//! four verb methods.

use reqwest::Method;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::breaker::{Admission, BreakerMap};
use crate::config::ResilienceConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::ResilienceError;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, ReqwestTransport, ServiceResponse, TransportRequest};
use crate::types::{BreakerSnapshot, CallContext};
use crate::{ResilienceResult, CORRELATION_HEADER};

/// Resilient HTTP client for calling peer services.
pub struct ResilientHttpClient {
    discovery: Arc<ServiceDiscovery>,
    breakers: BreakerMap,
    retry: RetryPolicy,
    transport: Arc<dyn HttpTransport>,
    retryable_statuses: Vec<u16>,
    request_timeout: Duration,
}

impl ResilientHttpClient {
    /// Create a client with the production reqwest transport.
    pub fn new(
        config: &ResilienceConfig,
        discovery: Arc<ServiceDiscovery>,
    ) -> ResilienceResult<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config, discovery, transport))
    }

    /// Create a client around an explicit transport. Tests use this to
    /// script transport behavior.
    pub fn with_transport(
        config: &ResilienceConfig,
        discovery: Arc<ServiceDiscovery>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            discovery,
            breakers: BreakerMap::new(config.breaker.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            transport,
            retryable_statuses: config.retry.retryable_status_codes.clone(),
            request_timeout: config.request_timeout,
        }
    }

    pub async fn get(
        &self,
        service: &str,
        path: &str,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.request(Method::GET, service, path, None, ctx).await
    }

    pub async fn post(
        &self,
        service: &str,
        path: &str,
        body: serde_json::Value,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.request(Method::POST, service, path, Some(body), ctx)
            .await
    }

    pub async fn put(
        &self,
        service: &str,
        path: &str,
        body: serde_json::Value,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.request(Method::PUT, service, path, Some(body), ctx)
            .await
    }

    pub async fn delete(
        &self,
        service: &str,
        path: &str,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.request(Method::DELETE, service, path, None, ctx).await
    }

    /// Diagnostics view of one target's breaker, if any calls have been
    /// made to it.
    pub async fn breaker_snapshot(&self, service: &str) -> Option<BreakerSnapshot> {
        self.breakers.snapshot(service).await
    }

    /// A handle bound to one target service, so per-service wrappers need
    /// no breaker/retry/discovery wiring of their own.
    pub fn for_service(self: &Arc<Self>, service: impl Into<String>) -> ServiceClient {
        ServiceClient {
            inner: Arc::clone(self),
            service: service.into(),
        }
    }

    async fn request(
        &self,
        method: Method,
        service: &str,
        path: &str,
        body: Option<serde_json::Value>,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        let deadline = ctx
            .deadline
            .unwrap_or_else(|| Instant::now() + self.request_timeout);

        let base_url = self.discovery.resolve(service).await?;

        let breaker = self.breakers.breaker_for(service).await;
        let admission = breaker.try_acquire().await;
        if admission == Admission::Rejected {
            debug!(service, "breaker rejected call without transport attempt");
            return Err(ResilienceError::ServiceUnavailable {
                service: service.to_string(),
            });
        }
        let was_trial = admission == Admission::Trial;

        let request = TransportRequest {
            method,
            url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            headers: self.build_headers(ctx),
            body,
        };
        debug!(service, url = %request.url, trial = was_trial, "dispatching call");

        // Only outcomes of actual transport attempts may feed the breaker
        // window; a deadline that runs out before any attempt says nothing
        // about the peer.
        let attempts_made = Arc::new(AtomicU32::new(0));

        let result = if was_trial {
            // A half-open trial is a single probe: no retries.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                breaker.abort_trial().await;
                return Err(ResilienceError::Timeout);
            }
            attempts_made.fetch_add(1, Ordering::SeqCst);
            Self::attempt(&self.transport, request, remaining).await
        } else {
            let transport = Arc::clone(&self.transport);
            let counted = Arc::clone(&attempts_made);
            self.retry
                .execute(&breaker, deadline, move |_attempt| {
                    let transport = Arc::clone(&transport);
                    let request = request.clone();
                    let counted = Arc::clone(&counted);
                    async move {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Err(ResilienceError::Timeout);
                        }
                        counted.fetch_add(1, Ordering::SeqCst);
                        Self::attempt(&transport, request, remaining).await
                    }
                })
                .await
        };

        // Surface the last underlying error; the attempt count stays in the
        // logs.
        let result = match result {
            Err(ResilienceError::RetriesExhausted { attempts, source }) => {
                warn!(service, attempts, error = %source, "retry attempts exhausted");
                Err(*source)
            }
            other => other,
        };

        match &result {
            Ok(_) => breaker.record_outcome(true, was_trial).await,
            // The retry loop observed the breaker open mid-sequence; there
            // is no transport outcome to record.
            Err(ResilienceError::ServiceUnavailable { .. }) => {}
            Err(e) if attempts_made.load(Ordering::SeqCst) > 0 => {
                let failure = e.is_transient(&self.retryable_statuses);
                breaker.record_outcome(!failure, was_trial).await;
                if matches!(e, ResilienceError::Connection(_)) {
                    self.discovery.invalidate(service).await;
                }
            }
            // The deadline ran out before the transport was ever attempted;
            // the peer was not observed, so nothing feeds the window.
            Err(_) => {}
        }

        result
    }

    async fn attempt(
        transport: &Arc<dyn HttpTransport>,
        request: TransportRequest,
        timeout: Duration,
    ) -> ResilienceResult<ServiceResponse> {
        let response = transport.execute(request, timeout).await?;
        if response.status >= 400 {
            return Err(ResilienceError::Upstream {
                status: response.status,
                body: response.body,
            });
        }
        Ok(response)
    }

    fn build_headers(&self, ctx: &CallContext) -> HashMap<String, String> {
        let mut headers = ctx.forwarded_headers.clone();
        let correlation_id = ctx
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        headers
            .entry(CORRELATION_HEADER.to_string())
            .or_insert(correlation_id);
        headers
    }
}

/// Client handle bound to one target service.
pub struct ServiceClient {
    inner: Arc<ResilientHttpClient>,
    service: String,
}

impl ServiceClient {
    /// Target service this handle calls.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub async fn get(&self, path: &str, ctx: &CallContext) -> ResilienceResult<ServiceResponse> {
        self.inner.get(&self.service, path, ctx).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.inner.post(&self.service, path, body, ctx).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
        ctx: &CallContext,
    ) -> ResilienceResult<ServiceResponse> {
        self.inner.put(&self.service, path, body, ctx).await
    }

    pub async fn delete(&self, path: &str, ctx: &CallContext) -> ResilienceResult<ServiceResponse> {
        self.inner.delete(&self.service, path, ctx).await
    }

    pub async fn breaker_snapshot(&self) -> Option<BreakerSnapshot> {
        self.inner.breaker_snapshot(&self.service).await
    }
}
