//! Configuration for the resilience layer

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ResilienceError;
use crate::ResilienceResult;

/// Top-level configuration for one service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Logical name this service announces itself under
    pub service_name: String,

    /// Host this instance listens on
    pub host: String,

    /// Port this instance listens on
    pub port: u16,

    /// Default per-call deadline when the caller supplies none
    pub request_timeout: Duration,

    /// Service discovery settings
    pub discovery: DiscoveryConfig,

    /// Circuit breaker settings (applied per target service)
    pub breaker: BreakerConfig,

    /// Retry settings
    pub retry: RetryConfig,

    /// Registration and heartbeat settings
    pub registration: RegistrationConfig,

    /// Local health aggregation settings
    pub health: HealthConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            service_name: "agrimesh-service".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            discovery: DiscoveryConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            registration: RegistrationConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Service discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Discovery backend kind
    pub backend: DiscoveryBackendKind,

    /// Agent endpoint, e.g. `http://localhost:8500`
    pub agent_endpoint: String,

    /// Optional agent API token
    pub agent_token: Option<String>,

    /// How long a resolved address stays fresh in the cache
    pub cache_ttl: Duration,

    /// Static service-name to base-URL table; sole source for the static
    /// backend, degrade fallback for the agent backend
    pub static_services: HashMap<String, String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backend: DiscoveryBackendKind::Agent,
            agent_endpoint: "http://localhost:8500".to_string(),
            agent_token: None,
            cache_ttl: Duration::from_secs(60),
            static_services: HashMap::new(),
        }
    }
}

/// Discovery backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryBackendKind {
    Agent,
    Static,
}

impl FromStr for DiscoveryBackendKind {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(DiscoveryBackendKind::Agent),
            "static" => Ok(DiscoveryBackendKind::Static),
            other => Err(ResilienceError::Configuration(format!(
                "unknown discovery backend: {}",
                other
            ))),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Percentage of failures in a full window above which the breaker opens.
    /// A window exactly at the threshold stays closed.
    pub failure_rate_threshold: f64,

    /// How long an open breaker waits before admitting a half-open trial
    pub wait_duration_in_open_state: Duration,

    /// Number of call outcomes in the sliding window
    pub sliding_window_size: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(30),
            sliding_window_size: 10,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per call, including the first
    pub max_attempts: u32,

    /// Delay before the first re-attempt
    pub delay: Duration,

    /// Cap on the backed-off delay
    pub max_delay: Duration,

    /// Multiplier applied per attempt; 1.0 keeps the delay fixed
    pub backoff_multiplier: f64,

    /// Add random jitter to each delay
    pub enable_jitter: bool,

    /// Jitter as a fraction of the delay (0.0 to 1.0)
    pub jitter_factor: f64,

    /// Upstream status codes treated as transient failures
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            enable_jitter: true,
            jitter_factor: 0.1,
            retryable_status_codes: vec![502, 503, 504],
        }
    }
}

/// Registration and heartbeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Heartbeat period
    pub heartbeat_interval: Duration,

    /// Backend expires the record after this long with no heartbeat;
    /// must exceed the heartbeat interval
    pub ttl: Duration,

    /// What to do when registration fails at startup
    pub on_registration_failure: RegistrationFailurePolicy,

    /// Bound on best-effort deregistration during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            ttl: Duration::from_secs(30),
            on_registration_failure: RegistrationFailurePolicy::FailFast,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Policy for registration failure at startup.
///
/// `FailFast` surfaces the error so the process can exit nonzero (an
/// undiscoverable service is often useless); `Degrade` logs and continues,
/// relying on peers' static fallback tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationFailurePolicy {
    FailFast,
    Degrade,
}

impl FromStr for RegistrationFailurePolicy {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail_fast" => Ok(RegistrationFailurePolicy::FailFast),
            "degrade" => Ok(RegistrationFailurePolicy::Degrade),
            other => Err(ResilienceError::Configuration(format!(
                "unknown registration failure policy: {}",
                other
            ))),
        }
    }
}

/// Health aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Per-probe timeout; a probe that exceeds it counts as DOWN
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl ResilienceConfig {
    /// Load configuration: from the TOML file named by `AGRIMESH_CONFIG` if
    /// set, otherwise from environment variables over defaults.
    pub async fn load() -> ResilienceResult<Self> {
        let config = if let Ok(path) = std::env::var("AGRIMESH_CONFIG") {
            Self::from_file(&path).await?
        } else {
            Self::from_env()?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub async fn from_file(path: &str) -> ResilienceResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ResilienceError::Configuration(format!("failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ResilienceError::Configuration(format!("failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> ResilienceResult<Self> {
        let defaults = Self::default();

        let mut config = Self {
            service_name: env_or("AGRIMESH_SERVICE_NAME", defaults.service_name),
            host: env_or("AGRIMESH_SERVICE_HOST", defaults.host),
            port: env_parse("AGRIMESH_SERVICE_PORT", defaults.port)?,
            request_timeout: env_millis("AGRIMESH_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
            ..defaults
        };

        if let Ok(backend) = std::env::var("AGRIMESH_DISCOVERY_BACKEND") {
            config.discovery.backend = backend.parse()?;
        }
        config.discovery.agent_endpoint = env_or(
            "AGRIMESH_DISCOVERY_ENDPOINT",
            config.discovery.agent_endpoint,
        );
        config.discovery.agent_token = std::env::var("AGRIMESH_DISCOVERY_TOKEN").ok();
        config.discovery.cache_ttl =
            env_millis("AGRIMESH_DISCOVERY_CACHE_TTL_MS", config.discovery.cache_ttl)?;

        config.breaker.failure_rate_threshold = env_parse(
            "AGRIMESH_FAILURE_RATE_THRESHOLD",
            config.breaker.failure_rate_threshold,
        )?;
        config.breaker.wait_duration_in_open_state = env_millis(
            "AGRIMESH_WAIT_DURATION_MS",
            config.breaker.wait_duration_in_open_state,
        )?;
        config.breaker.sliding_window_size = env_parse(
            "AGRIMESH_SLIDING_WINDOW_SIZE",
            config.breaker.sliding_window_size,
        )?;

        config.retry.max_attempts =
            env_parse("AGRIMESH_MAX_RETRY_ATTEMPTS", config.retry.max_attempts)?;
        config.retry.delay = env_millis("AGRIMESH_RETRY_DELAY_MS", config.retry.delay)?;

        config.registration.heartbeat_interval = env_millis(
            "AGRIMESH_HEARTBEAT_INTERVAL_MS",
            config.registration.heartbeat_interval,
        )?;
        config.registration.ttl =
            env_millis("AGRIMESH_REGISTRATION_TTL_MS", config.registration.ttl)?;
        if let Ok(policy) = std::env::var("AGRIMESH_REGISTRATION_FAILURE_POLICY") {
            config.registration.on_registration_failure = policy.parse()?;
        }

        Ok(config)
    }

    /// Validate invariants the components rely on.
    pub fn validate(&self) -> ResilienceResult<()> {
        if self.service_name.is_empty() {
            return Err(ResilienceError::Configuration(
                "service_name must not be empty".to_string(),
            ));
        }
        if self.breaker.sliding_window_size == 0 {
            return Err(ResilienceError::Configuration(
                "sliding_window_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.breaker.failure_rate_threshold) {
            return Err(ResilienceError::Configuration(format!(
                "failure_rate_threshold must be between 0 and 100, got {}",
                self.breaker.failure_rate_threshold
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ResilienceError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.registration.heartbeat_interval.is_zero() {
            return Err(ResilienceError::Configuration(
                "heartbeat_interval must be nonzero".to_string(),
            ));
        }
        if self.registration.ttl <= self.registration.heartbeat_interval {
            return Err(ResilienceError::Configuration(
                "registration ttl must exceed the heartbeat interval".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ResilienceError::Configuration(
                "request_timeout must be nonzero".to_string(),
            ));
        }
        if self.discovery.backend == DiscoveryBackendKind::Agent {
            url::Url::parse(&self.discovery.agent_endpoint).map_err(|e| {
                ResilienceError::Configuration(format!(
                    "invalid discovery agent endpoint {}: {}",
                    self.discovery.agent_endpoint, e
                ))
            })?;
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> ResilienceResult<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| ResilienceError::Configuration(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> ResilienceResult<Duration> {
    Ok(Duration::from_millis(env_parse(
        key,
        default.as_millis() as u64,
    )?))
}
