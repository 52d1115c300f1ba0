//! Shared types for the resilience layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::{AUTHORIZATION_HEADER, CORRELATION_HEADER};

/// A resolved service address held in the discovery cache.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    /// Logical service name
    pub service_name: String,

    /// Reachable base URL
    pub base_url: String,

    /// When this address was last confirmed by the backend
    pub last_seen_at: Instant,

    /// False once the entry is served past its TTL
    pub healthy: bool,
}

/// Registration record published to the discovery backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Logical service name
    pub service_name: String,

    /// Host this instance listens on
    pub host: String,

    /// Port this instance listens on
    pub port: u16,

    /// URL of this instance's health endpoint
    pub health_check_url: String,

    /// Heartbeat period
    pub heartbeat_interval: Duration,

    /// Backend expires the record after this long with no heartbeat
    pub ttl: Duration,
}

/// Per-call context propagated from the caller's inbound request to the
/// outbound call. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Absolute deadline shared by all retry attempts of the call
    pub deadline: Option<Instant>,

    /// Correlation id to forward; generated when absent
    pub correlation_id: Option<String>,

    /// Headers forwarded unmodified (e.g. Authorization)
    pub forwarded_headers: HashMap<String, String>,
}

impl CallContext {
    /// Build a context that forwards the `Authorization` and correlation-id
    /// headers of an inbound request, if present.
    pub fn forwarding(inbound_headers: &HashMap<String, String>) -> Self {
        let mut forwarded_headers = HashMap::new();
        let mut correlation_id = None;

        for (name, value) in inbound_headers {
            let lower = name.to_ascii_lowercase();
            if lower == AUTHORIZATION_HEADER {
                forwarded_headers.insert(AUTHORIZATION_HEADER.to_string(), value.clone());
            } else if lower == CORRELATION_HEADER {
                correlation_id = Some(value.clone());
            }
        }

        Self {
            deadline: None,
            correlation_id,
            forwarded_headers,
        }
    }

    /// Set the absolute deadline for the call.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Health verdict for a service or one of its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Up,
    Down,
}

/// Aggregated health report served at `GET /health` and consulted by the
/// registry heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall verdict; any dependency DOWN means DOWN
    pub status: HealthState,

    /// Reporting service name
    pub service: String,

    /// Per-dependency verdicts
    pub dependencies: HashMap<String, HealthState>,

    /// Report timestamp
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of one target's circuit breaker, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    /// Target service name
    pub target_service: String,

    /// Current state
    pub state: crate::breaker::BreakerState,

    /// Outcomes currently held in the sliding window
    pub recorded_outcomes: usize,

    /// Failures among the recorded outcomes
    pub window_failures: usize,

    /// Wall-clock time the breaker last opened, if currently open
    pub opened_since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding_picks_authorization_and_correlation() {
        let mut inbound = HashMap::new();
        inbound.insert("Authorization".to_string(), "Bearer token".to_string());
        inbound.insert("X-Correlation-Id".to_string(), "abc-123".to_string());
        inbound.insert("Cookie".to_string(), "session=1".to_string());

        let ctx = CallContext::forwarding(&inbound);

        assert_eq!(
            ctx.forwarded_headers.get(AUTHORIZATION_HEADER),
            Some(&"Bearer token".to_string())
        );
        assert_eq!(ctx.correlation_id.as_deref(), Some("abc-123"));
        assert!(!ctx.forwarded_headers.contains_key("Cookie"));
    }

    #[test]
    fn health_state_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&HealthState::Up).unwrap(), "\"UP\"");
        assert_eq!(
            serde_json::to_string(&HealthState::Down).unwrap(),
            "\"DOWN\""
        );
    }
}
