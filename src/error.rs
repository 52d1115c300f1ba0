//! Error types for the resilience layer

use thiserror::Error;

/// Error type for all inter-service communication operations.
///
/// The first four variants form the taxonomy that crosses the boundary to
/// calling business code; `ServiceUnavailable` and `Timeout` are "peer
/// degraded" signals suitable for cached or fallback responses, never
/// programming errors.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("service {service} is unavailable (circuit open)")]
    ServiceUnavailable { service: String },

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("unknown service: {service}")]
    ServiceNotFound { service: String },

    #[error("discovery backend unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("gave up after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ResilienceError>,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("registration error: {0}")]
    Registration(String),

    #[error("health check error: {0}")]
    Health(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResilienceError {
    /// Whether this error is transient for retry and breaker purposes.
    ///
    /// Timeouts, connection errors, and upstream responses whose status is in
    /// the configured retryable set count as transient. Client errors (4xx)
    /// do not: the peer is reachable and functioning, just rejecting this
    /// particular request, so they must never trip the breaker or burn retry
    /// budget.
    pub fn is_transient(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            ResilienceError::Timeout | ResilienceError::Connection(_) => true,
            ResilienceError::Upstream { status, .. } => retryable_statuses.contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ResilienceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ResilienceError::Timeout
        } else {
            ResilienceError::Connection(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for ResilienceError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ResilienceError::Timeout
    }
}

impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ResilienceError {
    fn from(err: std::io::Error) -> Self {
        ResilienceError::Internal(err.to_string())
    }
}
