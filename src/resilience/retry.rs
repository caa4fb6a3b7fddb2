//! Retry policies
//!
//! Backoff schedules with bounded jitter, plus a table that picks the policy
//! for a service key: an operation override wins over a provider override,
//! which wins over the default.

use super::types::{Operation, ServiceKey};
use crate::cloud::CloudProvider;
use rand::{thread_rng, Rng};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `base * factor^(attempt-1)`
    Exponential,
    /// `base * attempt`
    Linear,
    /// No delay between attempts
    Immediate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    strategy: BackoffStrategy,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(0.2)
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(BackoffStrategy::Exponential, max_attempts, base_delay)
    }

    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self::new(BackoffStrategy::Linear, max_attempts, base_delay)
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(BackoffStrategy::Immediate, max_attempts, Duration::ZERO)
    }

    fn new(strategy: BackoffStrategy, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            strategy,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter_fraction: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    /// Jitter as a fraction of the delay; 0.2 means ±20%
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Un-jittered delay after the given (1-based) failed attempt, capped
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Immediate => return Duration::ZERO,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let exp = (attempt - 1).min(63) as i32;
                let secs = self.base_delay.as_secs_f64() * self.factor.powi(exp);
                if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.max_delay
                }
            }
        };
        raw.min(self.max_delay)
    }

    /// Delay to sleep after the given failed attempt, with jitter applied
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let bounded = self.base_delay_for(attempt);
        if bounded.is_zero() || self.jitter_fraction <= 0.0 {
            return bounded;
        }
        let min = 1.0 - self.jitter_fraction;
        let max = 1.0 + self.jitter_fraction;
        let factor = thread_rng().gen_range(min..=max);
        Duration::from_secs_f64((bounded.as_secs_f64() * factor).max(0.0))
    }
}

/// Policy lookup by operation, then provider, then default
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    default: RetryPolicy,
    by_operation: HashMap<Operation, RetryPolicy>,
    by_provider: HashMap<CloudProvider, RetryPolicy>,
}

impl RetryPolicies {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            by_operation: HashMap::new(),
            by_provider: HashMap::new(),
        }
    }

    /// Policies tuned per operation and provider
    pub fn with_defaults(default: RetryPolicy) -> Self {
        Self::with_operation_presets(default)
            .provider(
                CloudProvider::Aws,
                RetryPolicy::exponential(4, Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(20))
                    .with_jitter(0.2),
            )
            .provider(
                CloudProvider::Azure,
                RetryPolicy::exponential(3, Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(15))
                    .with_jitter(0.15),
            )
            .provider(
                CloudProvider::Gcp,
                RetryPolicy::exponential(5, Duration::from_millis(800))
                    .with_max_delay(Duration::from_secs(25))
                    .with_factor(1.8)
                    .with_jitter(0.25),
            )
    }

    /// Per-operation presets only; every other key uses `default`
    pub fn with_operation_presets(default: RetryPolicy) -> Self {
        let list = RetryPolicy::exponential(3, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_jitter(0.2);
        let get = RetryPolicy::exponential(5, Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(0.3);

        Self::new(default)
            .operation(
                Operation::Authenticate,
                RetryPolicy::exponential(2, Duration::from_millis(500))
                    .with_max_delay(Duration::from_secs(2))
                    .with_jitter(0.1),
            )
            .operation(Operation::ListClusters, list.clone())
            .operation(Operation::ListRegistries, list)
            .operation(Operation::GetCluster, get.clone())
            .operation(Operation::GetRegistry, get)
            .operation(
                Operation::AuthenticateRegistry,
                RetryPolicy::exponential(3, Duration::from_secs(2))
                    .with_max_delay(Duration::from_secs(15))
                    .with_jitter(0.15),
            )
            .operation(
                Operation::Custom("network".to_string()),
                RetryPolicy::exponential(10, Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(60))
                    .with_factor(1.5)
                    .with_jitter(0.4),
            )
    }

    pub fn operation(mut self, operation: Operation, policy: RetryPolicy) -> Self {
        self.by_operation.insert(operation, policy);
        self
    }

    pub fn provider(mut self, provider: CloudProvider, policy: RetryPolicy) -> Self {
        self.by_provider.insert(provider, policy);
        self
    }

    pub fn set_operation(&mut self, operation: Operation, policy: RetryPolicy) {
        self.by_operation.insert(operation, policy);
    }

    pub fn set_provider(&mut self, provider: CloudProvider, policy: RetryPolicy) {
        self.by_provider.insert(provider, policy);
    }

    pub fn policy_for(&self, key: &ServiceKey) -> &RetryPolicy {
        self.by_operation
            .get(&key.operation)
            .or_else(|| self.by_provider.get(&key.provider))
            .unwrap_or(&self.default)
    }
}
