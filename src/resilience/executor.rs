//! Retry executor guarded by per-key circuit breakers
//!
//! Each `execute` call is one breaker outcome: it is admitted (or rejected)
//! once, retries internally with backoff, and reports success or failure to
//! the breaker when it finishes. Cancellation aborts between and during
//! attempts and is never counted as a failure.

use super::circuit_breaker::{BreakerConfig, BreakerStats, CircuitBreakers};
use super::context::OperationContext;
use super::health::HealthTracker;
use super::retry::{RetryPolicies, RetryPolicy};
use super::types::{Operation, ResilienceError, ServiceKey};
use crate::cloud::{CloudError, CloudProvider};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Whether another attempt could help.
///
/// Errors without a `CloudError` in their chain are treated as transient.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    CloudError::find(err).map(|e| e.retryable).unwrap_or(true)
}

pub struct CircuitBreakerRetryExecutor {
    policies: RwLock<RetryPolicies>,
    breakers: CircuitBreakers,
    health: Option<Arc<HealthTracker>>,
}

impl Default for CircuitBreakerRetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicies::with_defaults(RetryPolicy::default()))
    }
}

impl CircuitBreakerRetryExecutor {
    pub fn new(policies: RetryPolicies) -> Self {
        Self {
            policies: RwLock::new(policies),
            breakers: CircuitBreakers::new(),
            health: None,
        }
    }

    /// Report every attempt's outcome to `tracker` under the call's key.
    ///
    /// Off by default: `DegradationCoordinator` records one outcome per call
    /// and would double count if its executor reported too.
    pub fn with_health_reporting(mut self, tracker: Arc<HealthTracker>) -> Self {
        self.health = Some(tracker);
        self
    }

    pub fn set_operation_policy(&self, operation: Operation, policy: RetryPolicy) {
        self.policies.write().set_operation(operation, policy);
    }

    pub fn set_provider_policy(&self, provider: CloudProvider, policy: RetryPolicy) {
        self.policies.write().set_provider(provider, policy);
    }

    pub fn set_breaker_config(&self, operation: Operation, config: BreakerConfig) {
        self.breakers.set_config(operation, config);
    }

    pub fn policy_for(&self, key: &ServiceKey) -> RetryPolicy {
        self.policies.read().policy_for(key).clone()
    }

    pub fn breaker_stats(&self) -> HashMap<ServiceKey, BreakerStats> {
        self.breakers.stats()
    }

    /// Force a breaker closed; false if the key has no breaker yet
    pub fn reset_breaker(&self, key: &ServiceKey) -> bool {
        self.breakers.reset(key)
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    fn report(&self, key: &ServiceKey, outcome: Result<(), &anyhow::Error>, started: Instant) {
        if let Some(tracker) = &self.health {
            match outcome {
                Ok(()) => {
                    tracker.record_outcome(key, true, None, started.elapsed());
                }
                Err(e) => {
                    let message = e.to_string();
                    tracker.record_outcome(key, false, Some(&message), started.elapsed());
                }
            }
        }
    }

    /// Run `attempt_fn` under the breaker and retry policy for `key`.
    ///
    /// `attempt_fn` receives a child context and the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &OperationContext,
        key: &ServiceKey,
        mut attempt_fn: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut(OperationContext, u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if ctx.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        let breaker = self.breakers.get_or_create(key);
        let permit = match breaker.try_acquire() {
            Some(permit) => permit,
            None => {
                debug!(service = %key, "Rejected by open circuit breaker");
                return Err(ResilienceError::CircuitOpen { key: key.clone() });
            }
        };

        let policy = self.policy_for(key);
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            if ctx.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                _ = ctx.cancelled() => return Err(ResilienceError::Cancelled),
                outcome = attempt_fn(ctx.child(), attempt) => outcome,
            };

            match outcome {
                Ok(value) => {
                    self.report(key, Ok(()), started);
                    permit.success();
                    if attempt > 1 {
                        debug!(service = %key, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    self.report(key, Err(&e), started);

                    if attempt >= max_attempts || !is_retryable(&e) {
                        warn!(
                            service = %key,
                            attempt,
                            max_attempts,
                            error = %e,
                            "Operation failed"
                        );
                        permit.failure();
                        return Err(ResilienceError::Operation(e));
                    }

                    let delay = policy.delay_for(attempt);
                    debug!(
                        service = %key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    if !ctx.sleep(delay).await {
                        return Err(ResilienceError::Cancelled);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ErrorCode;
    use crate::resilience::circuit_breaker::BreakerState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn key() -> ServiceKey {
        ServiceKey::new(CloudProvider::Aws, Operation::ListClusters)
    }

    fn fast_executor(attempts: u32) -> CircuitBreakerRetryExecutor {
        let executor = CircuitBreakerRetryExecutor::new(RetryPolicies::new(
            RetryPolicy::exponential(attempts, Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        ));
        executor.set_breaker_config(
            Operation::ListClusters,
            BreakerConfig::new(2, Duration::from_millis(50)),
        );
        executor
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let executor = fast_executor(3);
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(&OperationContext::new(), &key(), |_ctx, attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        anyhow::bail!("flaky");
                    }
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let executor = fast_executor(5);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(&OperationContext::new(), &key(), |_ctx, _attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(anyhow::Error::new(CloudError::new(
                        CloudProvider::Aws,
                        "list_clusters",
                        ErrorCode::PermissionDenied,
                        "denied",
                    )))
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_attempt_fn() {
        let executor = fast_executor(1);
        let ctx = OperationContext::new();
        for _ in 0..2 {
            let _ = executor
                .execute(&ctx, &key(), |_c, _a| async { Err::<(), _>(anyhow::anyhow!("down")) })
                .await;
        }
        assert_eq!(executor.breaker_stats()[&key()].state, BreakerState::Open);

        let calls = AtomicU32::new(0);
        let err = executor
            .execute(&ctx, &key(), |_c, _a| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        executor
            .execute(&ctx, &key(), |_c, _a| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(executor.breaker_stats()[&key()].state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff() {
        let executor = CircuitBreakerRetryExecutor::new(RetryPolicies::new(
            RetryPolicy::exponential(5, Duration::from_secs(10)).with_max_delay(Duration::from_secs(10)),
        ));
        let ctx = OperationContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let calls = AtomicU32::new(0);
        let err = executor
            .execute(&ctx, &key(), |_c, _a| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("slow failure")) }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.breaker_stats()[&key()].total_failures, 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_context() {
        let executor = fast_executor(3);
        let ctx = OperationContext::new();
        ctx.cancel();
        let err = executor
            .execute(&ctx, &key(), |_c, _a| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_health_reporting_per_attempt() {
        let tracker = Arc::new(HealthTracker::default());
        let executor = fast_executor(3).with_health_reporting(tracker.clone());

        let _ = executor
            .execute(&OperationContext::new(), &key(), |_c, _a| async {
                Err::<(), _>(anyhow::anyhow!("nope"))
            })
            .await;

        assert_eq!(tracker.get(&key()).unwrap().error_count, 3);
    }
}
