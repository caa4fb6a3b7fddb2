//! Service health tracking
//!
//! `HealthTracker` keeps one rolling `ServiceHealth` record per service key
//! and derives its degradation level from the error count. `HealthChecker`
//! runs registered probes and feeds their outcomes into a tracker.

use super::context::OperationContext;
use super::types::{DegradationLevel, DegradationThresholds, ServiceHealth, ServiceKey};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tuning knobs for health accounting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    pub thresholds: DegradationThresholds,
    /// Amount the error rate drops per success
    pub success_rate_step: f64,
    /// Amount the error rate rises per failure
    pub failure_rate_step: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            thresholds: DegradationThresholds::default(),
            success_rate_step: 0.05,
            failure_rate_step: 0.10,
        }
    }
}

/// Per-key health records
#[derive(Debug, Default)]
pub struct HealthTracker {
    config: HealthConfig,
    records: RwLock<HashMap<ServiceKey, ServiceHealth>>,
}

impl HealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Record one observed outcome and return the updated snapshot
    pub fn record_outcome(
        &self,
        key: &ServiceKey,
        success: bool,
        error: Option<&str>,
        latency: Duration,
    ) -> ServiceHealth {
        let mut records = self.records.write();
        let health = records
            .entry(key.clone())
            .or_insert_with(|| ServiceHealth::new(key.clone()));

        health.last_check = Utc::now();
        health.healthy = success;

        if success {
            health.error_count = health.error_count.saturating_sub(1);
            health.error_rate = (health.error_rate - self.config.success_rate_step).max(0.0);
        } else {
            health.error_count = health.error_count.saturating_add(1);
            health.error_rate = (health.error_rate + self.config.failure_rate_step).min(1.0);
            if let Some(message) = error {
                health.last_error = Some(message.to_string());
            }
        }

        health.avg_response_time = if health.avg_response_time.is_zero() {
            latency
        } else {
            (health.avg_response_time + latency) / 2
        };

        let previous = health.degradation_level;
        health.degradation_level = self.config.thresholds.level_for(health.error_count);
        if health.degradation_level != previous {
            debug!(
                service = %key,
                from = %previous,
                to = %health.degradation_level,
                error_count = health.error_count,
                "Degradation level changed"
            );
        }

        health.clone()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<ServiceHealth> {
        self.records.read().get(key).cloned()
    }

    /// Current level, `None` when the key has never been observed
    pub fn level(&self, key: &ServiceKey) -> Option<DegradationLevel> {
        self.records.read().get(key).map(|h| h.degradation_level)
    }

    /// Return a key to the healthy baseline
    pub fn reset(&self, key: &ServiceKey) {
        if let Some(health) = self.records.write().get_mut(key) {
            health.healthy = true;
            health.error_count = 0;
            health.error_rate = 0.0;
            health.degradation_level = DegradationLevel::None;
            health.last_error = None;
            health.last_check = Utc::now();
        }
    }

    /// Copy of every record
    pub fn snapshot(&self) -> HashMap<ServiceKey, ServiceHealth> {
        self.records.read().clone()
    }
}

/// An async health probe
pub type HealthCheck =
    Arc<dyn Fn(OperationContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a `HealthCheck`
pub fn health_check<F, Fut>(check: F) -> HealthCheck
where
    F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |ctx| check(ctx).boxed())
}

/// Runs registered probes and records their outcomes
pub struct HealthChecker {
    tracker: Arc<HealthTracker>,
    checks: RwLock<HashMap<ServiceKey, HealthCheck>>,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(tracker: Arc<HealthTracker>) -> Self {
        Self {
            tracker,
            checks: RwLock::new(HashMap::new()),
            interval: Duration::from_secs(30),
        }
    }

    /// Set how often `run_periodic` probes
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn register(&self, key: ServiceKey, check: HealthCheck) {
        self.checks.write().insert(key, check);
    }

    /// Run every registered probe once; returns the failures by key
    pub async fn run_checks(&self, ctx: &OperationContext) -> HashMap<ServiceKey, String> {
        let checks: Vec<(ServiceKey, HealthCheck)> = self
            .checks
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();

        let mut failures = HashMap::new();
        for (key, check) in checks {
            if ctx.is_cancelled() {
                break;
            }
            let start = Instant::now();
            let outcome = check(ctx.child()).await;
            let elapsed = start.elapsed();
            match outcome {
                Ok(()) => {
                    self.tracker.record_outcome(&key, true, None, elapsed);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    warn!(service = %key, error = %message, "Health check failed");
                    self.tracker
                        .record_outcome(&key, false, Some(&message), elapsed);
                    failures.insert(key, message);
                }
            }
        }
        failures
    }

    /// Probe on a fixed interval until the context is cancelled
    pub async fn run_periodic(&self, ctx: OperationContext) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = ticker.tick() => {
                    let failures = self.run_checks(&ctx).await;
                    debug!(failed = failures.len(), "Periodic health checks complete");
                }
            }
        }
    }
}
