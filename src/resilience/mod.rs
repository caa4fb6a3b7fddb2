//! Resilience Layer
//!
//! Keeps cloud operations available while providers fail. A
//! `DegradationCoordinator` runs each operation through a
//! `CircuitBreakerRetryExecutor`, tracks per-(provider, operation) health,
//! and escalates remediation as the degradation level rises.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► DegradationCoordinator ──► ResultCache (fresh hit? return)
//!                 │
//!                 ├──► CircuitBreakerRetryExecutor ──► primary_op(ctx, provider)
//!                 │         (breaker per key, backoff + jitter)
//!                 │
//!                 ├──► HealthTracker.record_outcome ──► DegradationLevel
//!                 │
//!                 └──► remediation by level:
//!                        none/minor: cache, retry, handler
//!                        major:      fallback provider (one hop), cache, handler
//!                        severe:     stale cache (3x TTL), empty result, handler
//!                        complete:   cache of any age, empty result
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod context;
pub mod coordinator;
pub mod executor;
pub mod health;
pub mod retry;
pub mod types;

pub use cache::{CacheAcceptance, ResultCache};
pub use circuit_breaker::{BreakerConfig, BreakerState, BreakerStats, CircuitBreaker, CircuitBreakers};
pub use context::OperationContext;
pub use coordinator::{degradation_handler, DegradationCoordinator, DegradationHandler, DegradationStrategy};
pub use executor::CircuitBreakerRetryExecutor;
pub use health::{health_check, HealthCheck, HealthChecker, HealthConfig, HealthTracker};
pub use retry::{BackoffStrategy, RetryPolicies, RetryPolicy};
pub use types::{
    DegradationLevel, DegradationThresholds, Operation, OperationResult, ResilienceError,
    ServiceHealth, ServiceKey,
};
