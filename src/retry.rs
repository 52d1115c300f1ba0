//! Retry policy for transient failures
//!
//! Bounded re-attempts with backoff, sharing one deadline across the whole
//! sequence and short-circuiting as soon as the target's breaker opens.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::breaker::{BreakerState, CircuitBreaker};
use crate::config::RetryConfig;
use crate::error::ResilienceError;
use crate::ResilienceResult;

/// Retry policy implementation.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Status codes the policy treats as transient.
    pub fn retryable_status_codes(&self) -> &[u16] {
        &self.config.retryable_status_codes
    }

    /// Execute `op` with up to `max_attempts` attempts.
    ///
    /// Only transient failures are re-attempted; client errors (4xx) and
    /// anything else non-transient surface immediately. The breaker is
    /// consulted before every attempt so a target that opened mid-sequence
    /// is not hammered. `deadline` bounds the whole sequence: a delay that
    /// would outlive it turns into `Timeout` regardless of remaining
    /// attempt budget.
    pub async fn execute<F, Fut, T>(
        &self,
        breaker: &CircuitBreaker,
        deadline: Instant,
        op: F,
    ) -> ResilienceResult<T>
    where
        F: Fn(u32) -> Fut + Send + Sync,
        Fut: Future<Output = ResilienceResult<T>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;
        let mut last_error = None;

        while attempt < self.config.max_attempts {
            if breaker.current_state().await == BreakerState::Open {
                return Err(ResilienceError::ServiceUnavailable {
                    service: breaker.target_service().to_string(),
                });
            }
            if Instant::now() >= deadline {
                return Err(ResilienceError::Timeout);
            }

            attempt += 1;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient(&self.config.retryable_status_codes) => {
                    debug!(attempt, error = %e, "transient failure");
                    last_error = Some(e);

                    if attempt < self.config.max_attempts {
                        let delay = self.delay_for(attempt);
                        if Instant::now() + delay >= deadline {
                            return Err(ResilienceError::Timeout);
                        }
                        sleep(delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let source = last_error.unwrap_or_else(|| {
            ResilienceError::Internal("retry loop exhausted without an error".to_string())
        });
        Err(ResilienceError::RetriesExhausted {
            attempts: attempt,
            source: Box::new(source),
        })
    }

    /// Delay before the re-attempt following attempt number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = if self.config.backoff_multiplier > 1.0 {
            let factor = self
                .config
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);
            self.config.delay.mul_f64(factor)
        } else {
            self.config.delay
        };

        let capped = base.min(self.config.max_delay);
        if self.config.enable_jitter && self.config.jitter_factor > 0.0 {
            let jitter =
                capped.mul_f64(self.config.jitter_factor * rand::thread_rng().gen_range(0.0..1.0));
            capped + jitter
        } else {
            capped
        }
    }
}
